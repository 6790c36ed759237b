//! Grouped joins end to end: spilling, self-joins, joiner semantics

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{count_files, fields, fs_config, keyed_rows, memory_config, row};
use tupleflow_core::tuple::Tuple;
use tupleflow_core::types::Scalar;
use tupleflow_exec::{Engine, LocalRunner};
use tupleflow_operators::join::joiner::{InnerJoin, LeftJoin, MixedJoin, OuterJoin};
use tupleflow_operators::Joiner;
use tupleflow_planner::Assembly;

fn two_way(joiner: Arc<dyn Joiner>) -> (Assembly, tupleflow_core::id::NodeId) {
    let mut asm = Assembly::new();
    let lhs = asm.source("lhs", fields(&["k", "a"])).expect("lhs");
    let rhs = asm.source("rhs", fields(&["kr", "b"])).expect("rhs");
    let j = asm
        .co_group(
            "join",
            &[lhs, rhs],
            vec![fields(&["k"]), fields(&["kr"])],
            None,
            joiner,
        )
        .expect("co_group");
    (asm, j)
}

#[test]
fn test_spilled_branch_joins_in_order_and_cleans_up() {
    let threshold = 4;
    let dir = tempfile::tempdir().expect("tempdir");
    let (asm, j) = two_way(Arc::new(InnerJoin));

    let lhs = keyed_rows("x", 2);
    let rhs = keyed_rows("x", threshold + 5);
    let sources = HashMap::from([
        ("lhs".to_string(), lhs.clone()),
        ("rhs".to_string(), rhs.clone()),
    ]);

    let mut runner = LocalRunner::new(&asm, fs_config(dir.path(), threshold)).expect("runner");
    let out = runner.run(&sources, j).expect("run");

    let expected: Vec<Tuple> = lhs
        .iter()
        .flat_map(|l| rhs.iter().map(move |r| l.append(&[r])))
        .collect();
    assert_eq!(out, expected);

    let counters = runner.counters().expect("counters");
    assert_eq!(counters.spill_events(), 1);
    assert_eq!(counters.spilled_tuples(), (threshold + 1) as u64);
    assert_eq!(counters.live_segments, 0);
    assert_eq!(count_files(dir.path()), 0);
}

#[test]
fn test_buffers_are_released_between_keys() {
    let mut asm = Assembly::new();
    let src = asm.source("src", fields(&["k", "v"])).expect("source");
    let sj = asm
        .self_join("sj", src, fields(&["k"]), 1, None, Arc::new(InnerJoin))
        .expect("self join");
    let plan = asm.splice_plan(sj).expect("plan");

    let mut engine = Engine::new(memory_config(2)).expect("engine");
    for key in ["a", "b", "c"] {
        let values = keyed_rows(key, 6).into_iter().map(|t| (0, t));
        let joined = engine
            .co_group(&plan, &Tuple::of([key]), values)
            .expect("join")
            .collect::<Result<Vec<_>, _>>()
            .expect("values");
        assert_eq!(joined.len(), 36);
        // Only the current key's segments are alive.
        assert!(engine.live_segments().expect("segments") <= 3);
    }
    engine.finish_all().expect("finish");
    assert_eq!(engine.live_segments().expect("segments"), 0);
}

#[test]
fn test_self_join_of_three_values_yields_nine() {
    let mut asm = Assembly::new();
    let src = asm.source("src", fields(&["k", "v"])).expect("source");
    let sj = asm
        .self_join("sj", src, fields(&["k"]), 1, None, Arc::new(InnerJoin))
        .expect("self join");
    let scope = asm.scope(sj).expect("scope");
    assert_eq!(scope.outgoing.len(), 4);
    assert_eq!(scope.outgoing.names(), vec!["k", "v"]);

    let sources = HashMap::from([("src".to_string(), keyed_rows("x", 3))]);
    let mut runner = LocalRunner::new(&asm, memory_config(1)).expect("runner");
    let out = runner.run(&sources, sj).expect("run");
    assert_eq!(out.len(), 9);
    let firsts: Vec<i64> = out
        .iter()
        .map(|t| t.get(1).and_then(Scalar::as_i64).expect("int"))
        .collect();
    assert_eq!(firsts, vec![0, 0, 0, 1, 1, 1, 2, 2, 2]);
    assert!(out.iter().all(Tuple::is_frozen));
}

#[test]
fn test_inner_and_outer_differ_on_a_missing_key() {
    let sources = HashMap::from([
        (
            "lhs".to_string(),
            vec![
                row(vec!["a".into(), 1.into()]),
                row(vec!["b".into(), 2.into()]),
            ],
        ),
        ("rhs".to_string(), vec![row(vec!["a".into(), 10.into()])]),
    ]);

    let (inner, j) = two_way(Arc::new(InnerJoin));
    let inner_out = LocalRunner::new(&inner, memory_config(8))
        .expect("runner")
        .run(&sources, j)
        .expect("run");
    assert_eq!(
        inner_out,
        vec![row(vec!["a".into(), 1.into(), "a".into(), 10.into()])]
    );

    let (outer, j) = two_way(Arc::new(OuterJoin));
    let outer_out = LocalRunner::new(&outer, memory_config(8))
        .expect("runner")
        .run(&sources, j)
        .expect("run");
    assert_eq!(
        outer_out,
        vec![
            row(vec!["a".into(), 1.into(), "a".into(), 10.into()]),
            row(vec!["b".into(), 2.into(), Scalar::Null, Scalar::Null]),
        ]
    );
}

#[test]
fn test_left_and_mixed_joins() {
    let sources = HashMap::from([
        ("lhs".to_string(), vec![row(vec!["a".into(), 1.into()])]),
        (
            "rhs".to_string(),
            vec![
                row(vec!["a".into(), 10.into()]),
                row(vec!["z".into(), 26.into()]),
            ],
        ),
    ]);

    let (left, j) = two_way(Arc::new(LeftJoin));
    let out = LocalRunner::new(&left, memory_config(8))
        .expect("runner")
        .run(&sources, j)
        .expect("run");
    assert_eq!(out.len(), 1);

    // Lead outer, right inner: keys missing on the left are padded there.
    let (mixed, j) = two_way(Arc::new(MixedJoin::new(vec![false, true])));
    let out = LocalRunner::new(&mixed, memory_config(8))
        .expect("runner")
        .run(&sources, j)
        .expect("run");
    assert_eq!(
        out,
        vec![
            row(vec!["a".into(), 1.into(), "a".into(), 10.into()]),
            row(vec![Scalar::Null, Scalar::Null, "z".into(), 26.into()]),
        ]
    );
}

#[test]
fn test_hash_join_emits_flat_tuples_in_key_order() {
    let mut asm = Assembly::new();
    let lhs = asm.source("lhs", fields(&["k", "a"])).expect("lhs");
    let rhs = asm.source("rhs", fields(&["kr", "b"])).expect("rhs");
    let hj = asm
        .hash_join(
            "hj",
            &[lhs, rhs],
            vec![fields(&["k"]), fields(&["kr"])],
            None,
            Arc::new(InnerJoin),
        )
        .expect("hash join");
    assert!(!asm.scope(hj).expect("scope").is_grouping());

    let sources = HashMap::from([
        (
            "lhs".to_string(),
            vec![row(vec![2.into(), "two".into()]), row(vec![1.into(), "one".into()])],
        ),
        (
            "rhs".to_string(),
            vec![row(vec![1.into(), "uno".into()]), row(vec![2.into(), "dos".into()])],
        ),
    ]);
    let mut cfg = memory_config(8);
    cfg.reverse_sort = true;
    let out = LocalRunner::new(&asm, cfg)
        .expect("runner")
        .run(&sources, hj)
        .expect("run");
    assert_eq!(
        out,
        vec![
            row(vec![2.into(), "two".into(), 2.into(), "dos".into()]),
            row(vec![1.into(), "one".into(), 1.into(), "uno".into()]),
        ]
    );
}
