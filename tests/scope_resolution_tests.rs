//! Construction-time scope resolution through the assembly API

mod common;

use std::sync::Arc;

use common::fields;
use tupleflow_core::fields::Fields;
use tupleflow_core::types::{DataType, FieldType};
use tupleflow_core::Error;
use tupleflow_operators::join::joiner::InnerJoin;
use tupleflow_operators::ops::{Count, FilterNull, Identity, Sum};
use tupleflow_operators::{Each, Every};
use tupleflow_planner::Assembly;

#[test]
fn test_arity_is_checked_at_construction() {
    let mut asm = Assembly::new();
    let src = asm.source("src", fields(&["k", "v"])).expect("source");
    let g = asm.group_by("g", src, fields(&["k"])).expect("group");
    let sum = Every::aggregator("sum", Fields::none(), Arc::new(Sum::new("s")), Fields::all());
    match asm.every(g, sum) {
        Err(Error::Arity {
            operation,
            required,
            resolved,
        }) => {
            assert_eq!(operation, "sum");
            assert_eq!(required, 1);
            assert_eq!(resolved, 0);
        }
        other => panic!("expected an arity error, got {other:?}"),
    }
}

#[test]
fn test_key_size_mismatch_is_rejected() {
    let mut asm = Assembly::new();
    let a = asm.source("a", fields(&["k1", "k2", "x"])).expect("source");
    let b = asm.source("b", fields(&["k", "y"])).expect("source");
    let err = asm
        .co_group(
            "j",
            &[a, b],
            vec![fields(&["k1", "k2"]), fields(&["k"])],
            None,
            Arc::new(InnerJoin),
        )
        .expect_err("key sizes differ");
    assert!(matches!(err, Error::KeySizeMismatch { ref sizes, .. } if sizes == &vec![2, 1]));
    assert_eq!(asm.len(), 2);
}

#[test]
fn test_key_types_compare_after_widening() {
    let mut asm = Assembly::new();
    let a = asm
        .source(
            "a",
            Fields::typed([
                ("k", FieldType::required(DataType::Int64)),
                ("x", FieldType::nullable(DataType::Utf8)),
            ])
            .expect("typed"),
        )
        .expect("source");
    let b = asm
        .source(
            "b",
            Fields::typed([("kb", FieldType::nullable(DataType::Int64))]).expect("typed"),
        )
        .expect("source");
    let c = asm
        .source(
            "c",
            Fields::typed([("kc", FieldType::required(DataType::Utf8))]).expect("typed"),
        )
        .expect("source");

    asm.co_group(
        "ok",
        &[a, b],
        vec![fields(&["k"]), fields(&["kb"])],
        None,
        Arc::new(InnerJoin),
    )
    .expect("boxed and primitive keys agree");
    assert!(matches!(
        asm.co_group(
            "bad",
            &[a, c],
            vec![fields(&["k"]), fields(&["kc"])],
            None,
            Arc::new(InnerJoin),
        ),
        Err(Error::KeyTypeMismatch { .. })
    ));
}

#[test]
fn test_resolution_is_idempotent() {
    let build = || {
        let mut asm = Assembly::new();
        let src = asm.source("src", fields(&["k", "v", "w"])).expect("source");
        let clean = asm
            .each(src, Each::filter("clean", fields(&["v"]), Arc::new(FilterNull)))
            .expect("filter");
        let id = asm
            .each(
                clean,
                Each::function("copy", fields(&["w"]), Arc::new(Identity), Fields::swap()),
            )
            .expect("function");
        let g = asm.group_by("g", id, fields(&["k"])).expect("group");
        asm.every(
            g,
            Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all()),
        )
        .expect("every");
        asm
    };
    let first = build();
    let second = build();
    for (a, b) in first.scopes().iter().zip(second.scopes()) {
        assert_eq!(a, b);
        assert_eq!(
            a.fingerprint().expect("fingerprint"),
            b.fingerprint().expect("fingerprint")
        );
    }
    assert_eq!(
        first.scopes_json().expect("json"),
        second.scopes_json().expect("json")
    );
}

#[test]
fn test_cross_aggregator_arguments_are_rejected() {
    let mut asm = Assembly::new();
    let src = asm.source("src", fields(&["k", "v"])).expect("source");
    let g = asm.group_by("g", src, fields(&["k"])).expect("group");
    let c = asm
        .every(
            g,
            Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all()),
        )
        .expect("count");
    let sum = Every::aggregator("sum", fields(&["n"]), Arc::new(Sum::new("s")), Fields::all());
    assert!(matches!(
        asm.every(c, sum),
        Err(Error::CrossAggregatorArgument { .. })
    ));
}

#[test]
fn test_merge_requires_identical_fields() {
    let mut asm = Assembly::new();
    let a = asm.source("a", fields(&["k", "v"])).expect("source");
    let b = asm.source("b", fields(&["k", "w"])).expect("source");
    assert!(matches!(
        asm.merge("m", &[a, b]),
        Err(Error::MergeSchemaMismatch { .. })
    ));
}

#[test]
fn test_co_group_declaration_must_match_width() {
    let mut asm = Assembly::new();
    let a = asm.source("a", fields(&["k", "x"])).expect("source");
    let b = asm.source("b", fields(&["k", "y"])).expect("source");
    assert!(matches!(
        asm.co_group(
            "dup",
            &[a, b],
            vec![fields(&["k"])],
            None,
            Arc::new(InnerJoin)
        ),
        Err(Error::SchemaConflict(_))
    ));
    let renamed = asm
        .co_group(
            "renamed",
            &[a, b],
            vec![fields(&["k"])],
            Some(fields(&["k1", "x", "k2", "y"])),
            Arc::new(InnerJoin),
        )
        .expect("declared");
    assert_eq!(
        asm.scope(renamed).expect("scope").outgoing,
        fields(&["k1", "x", "k2", "y"])
    );
    assert!(matches!(
        asm.co_group(
            "short",
            &[a, b],
            vec![fields(&["k"])],
            Some(fields(&["k", "x"])),
            Arc::new(InnerJoin)
        ),
        Err(Error::SchemaConflict(_))
    ));
}
