//! Splice: the nodes that bring branches together on a key.
//!
//! Keys are resolved per branch and must agree in size and, where typed, in
//! widened type. Merging splices (Merge, multi-branch GroupBy) require every
//! branch to carry identical fields; joining splices (CoGroup, HashJoin)
//! declare the concatenation of their branches.

use std::collections::BTreeSet;
use std::sync::Arc;

use tupleflow_core::error::{Error, Result};
use tupleflow_core::fields::Fields;
use tupleflow_core::scope::{Scope, ScopeKind, SpliceKind};

use crate::join::joiner::{InnerJoin, Joiner};

#[derive(Debug, Clone)]
pub struct Splice {
    pub name: String,
    pub kind: SpliceKind,
    /// One key selector per branch, or a single selector shared by all.
    pub keys: Vec<Fields>,
    /// Secondary sort within a group.
    pub sort: Option<Fields>,
    pub declared: Option<Fields>,
    pub joiner: Arc<dyn Joiner>,
    pub num_self_joins: usize,
    pub reverse: bool,
}

impl Splice {
    fn new(name: impl Into<String>, kind: SpliceKind, keys: Vec<Fields>) -> Self {
        Self {
            name: name.into(),
            kind,
            keys,
            sort: None,
            declared: None,
            joiner: Arc::new(InnerJoin),
            num_self_joins: 0,
            reverse: false,
        }
    }

    pub fn group_by(name: impl Into<String>, key: Fields) -> Self {
        Self::new(name, SpliceKind::GroupBy, vec![key])
    }

    pub fn co_group(
        name: impl Into<String>,
        keys: Vec<Fields>,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Self {
        Self {
            declared,
            joiner,
            ..Self::new(name, SpliceKind::CoGroup, keys)
        }
    }

    /// A co-group of one branch with itself, `num_self_joins + 1` times.
    pub fn self_join(
        name: impl Into<String>,
        key: Fields,
        num_self_joins: usize,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Self {
        Self {
            declared,
            joiner,
            num_self_joins,
            ..Self::new(name, SpliceKind::CoGroup, vec![key])
        }
    }

    pub fn hash_join(
        name: impl Into<String>,
        keys: Vec<Fields>,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Self {
        Self {
            declared,
            joiner,
            ..Self::new(name, SpliceKind::HashJoin, keys)
        }
    }

    pub fn merge(name: impl Into<String>) -> Self {
        Self::new(name, SpliceKind::Merge, Vec::new())
    }

    pub fn with_sort(mut self, sort: Fields, reverse: bool) -> Self {
        self.sort = Some(sort);
        self.reverse = reverse;
        self
    }

    pub fn is_self_join(&self) -> bool {
        self.num_self_joins > 0
    }

    fn check_branches(&self, n: usize) -> Result<()> {
        let ok = match self.kind {
            SpliceKind::GroupBy => n >= 1 && !self.is_self_join(),
            SpliceKind::CoGroup | SpliceKind::HashJoin if self.is_self_join() => n == 1,
            SpliceKind::CoGroup | SpliceKind::HashJoin | SpliceKind::Merge => n >= 2,
        };
        if !ok {
            return Err(Error::InvalidAssembly(format!(
                "'{}': {:?} cannot splice {n} branches{}",
                self.name,
                self.kind,
                if self.is_self_join() { " as a self-join" } else { "" }
            )));
        }
        if self.kind != SpliceKind::Merge && self.keys.len() != 1 && self.keys.len() != n {
            return Err(Error::InvalidAssembly(format!(
                "'{}': {} key selectors for {n} branches",
                self.name,
                self.keys.len()
            )));
        }
        Ok(())
    }

    /// Resolve against the scopes of every incoming branch, in branch order.
    pub fn resolve(&self, incoming: &[&Scope]) -> Result<Scope> {
        self.check_branches(incoming.len())?;

        let keys = if self.kind == SpliceKind::Merge {
            vec![Fields::none(); incoming.len()]
        } else {
            incoming
                .iter()
                .enumerate()
                .map(|(i, scope)| {
                    let selector = self.keys.get(i).unwrap_or(&self.keys[0]);
                    scope.outgoing.select(selector)
                })
                .collect::<Result<Vec<_>>>()?
        };
        self.verify_keys(&keys)?;

        if self.kind == SpliceKind::Merge
            || (self.kind == SpliceKind::GroupBy && incoming.len() > 1)
        {
            self.verify_identical(incoming)?;
        }

        let sorting_selectors = match &self.sort {
            Some(sort) => incoming
                .iter()
                .map(|s| Ok((s.name.clone(), s.outgoing.select(sort)?)))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let lead = &incoming[0].outgoing;
        let grouping = if keys[0].is_none() {
            Fields::empty()
        } else {
            keys[0].clone()
        };
        let (declared, outgoing, grouping, values) = match self.kind {
            SpliceKind::GroupBy => (lead.clone(), lead.clone(), grouping, lead.clone()),
            SpliceKind::Merge => (lead.clone(), lead.clone(), Fields::none(), Fields::none()),
            SpliceKind::CoGroup => {
                let declared = self.declared_fields(incoming)?;
                (declared.clone(), declared.clone(), grouping, declared)
            }
            SpliceKind::HashJoin => {
                let declared = self.declared_fields(incoming)?;
                (declared.clone(), declared, Fields::none(), Fields::none())
            }
        };

        let key_selectors = incoming
            .iter()
            .zip(keys)
            .map(|(s, k)| (s.name.clone(), k))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            node = %self.name,
            kind = ?self.kind,
            %grouping,
            %outgoing,
            "resolved splice"
        );

        Ok(Scope {
            name: self.name.clone(),
            kind: ScopeKind::Splice(self.kind),
            arguments: Fields::none(),
            declared,
            outgoing,
            grouping,
            values,
            pass_through: Fields::none(),
            remainder: Fields::none(),
            key_selectors,
            sorting_selectors,
        })
    }

    fn verify_keys(&self, keys: &[Fields]) -> Result<()> {
        let known: Vec<&Fields> = keys.iter().filter(|k| !k.is_unknown()).collect();
        let sizes: Vec<usize> = known.iter().map(|k| k.len()).collect();
        if sizes.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::KeySizeMismatch {
                splice: self.name.clone(),
                sizes,
            });
        }

        let width = sizes.first().copied().unwrap_or(0);
        for column in 0..width {
            let types: Vec<_> = known
                .iter()
                .filter(|k| k.comparator(column).is_none())
                .filter_map(|k| k.field_type(column))
                .map(|t| t.widened())
                .collect();
            let distinct: BTreeSet<String> = types.iter().map(|t| t.data_type.to_string()).collect();
            if distinct.len() > 1 {
                return Err(Error::KeyTypeMismatch {
                    splice: self.name.clone(),
                    column,
                    types: distinct.into_iter().collect(),
                });
            }
        }
        Ok(())
    }

    fn verify_identical(&self, incoming: &[&Scope]) -> Result<()> {
        let first = &incoming[0].outgoing;
        let same = incoming
            .iter()
            .all(|s| s.outgoing == *first && s.outgoing.types() == first.types());
        if same {
            return Ok(());
        }
        Err(Error::MergeSchemaMismatch {
            splice: self.name.clone(),
            found: incoming.iter().map(|s| s.outgoing.to_string()).collect(),
        })
    }

    /// The fields of a joined tuple: user supplied, or every branch in order.
    fn declared_fields(&self, incoming: &[&Scope]) -> Result<Fields> {
        let branches: Vec<&Fields> = if self.is_self_join() {
            vec![&incoming[0].outgoing; self.num_self_joins + 1]
        } else {
            incoming.iter().map(|s| &s.outgoing).collect()
        };
        let all_defined = branches.iter().all(|f| f.is_defined());

        match (&self.declared, all_defined) {
            (Some(declared), true) => {
                let joined = Fields::join(true, &branches)?;
                if !declared.is_defined() || declared.len() != joined.len() {
                    return Err(Error::SchemaConflict(format!(
                        "'{}': declared fields {declared} must match the size of all joined fields {joined}",
                        self.name
                    )));
                }
                Ok(declared.clone())
            }
            (Some(declared), false) => Ok(declared.clone()),
            (None, true) => Fields::join(self.is_self_join(), &branches),
            (None, false) => Ok(Fields::unknown()),
        }
    }

    /// Widths of the physical branches, for null padding at run time.
    pub fn branch_widths(incoming: &[&Scope]) -> Vec<Option<usize>> {
        incoming
            .iter()
            .map(|s| s.outgoing.is_defined().then(|| s.outgoing.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use tupleflow_core::fields::ValueComparator;
    use tupleflow_core::types::{scalar_cmp, DataType, FieldType, Scalar};

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    fn src(name: &str, names: &[&str]) -> Scope {
        Scope::source(name, f(names))
    }

    fn typed(name: &str, cols: &[(&str, DataType)]) -> Scope {
        let fields =
            Fields::typed(cols.iter().map(|(n, t)| (*n, FieldType::required(*t)))).unwrap();
        Scope::source(name, fields)
    }

    fn inner() -> Arc<dyn Joiner> {
        Arc::new(InnerJoin)
    }

    #[test]
    fn group_by_exposes_key_and_values() {
        let s = src("in", &["k", "v"]);
        let scope = Splice::group_by("g", f(&["k"])).resolve(&[&s]).unwrap();
        assert_eq!(scope.grouping, f(&["k"]));
        assert_eq!(scope.values, f(&["k", "v"]));
        assert_eq!(scope.outgoing, f(&["k", "v"]));
        assert_eq!(scope.key_selectors, vec![("in".to_string(), f(&["k"]))]);
    }

    #[test]
    fn key_sizes_must_match() {
        let a = src("a", &["x", "y", "z"]);
        let b = src("b", &["p", "q", "r"]);
        let splice = Splice::co_group("cg", vec![f(&["x", "y"]), f(&["p", "q", "r"])], None, inner());
        match splice.resolve(&[&a, &b]).unwrap_err() {
            Error::KeySizeMismatch { splice, sizes } => {
                assert_eq!(splice, "cg");
                assert_eq!(sizes, vec![2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn key_types_are_compared_widened() {
        let a = typed("a", &[("x", DataType::Int64)]);
        let b = Scope::source(
            "b",
            Fields::typed([("y", FieldType::nullable(DataType::Int64))]).unwrap(),
        );
        let c = typed("c", &[("z", DataType::Utf8)]);

        let ok = Splice::co_group("cg", vec![f(&["x"]), f(&["y"])], None, inner());
        ok.resolve(&[&a, &b]).unwrap();

        let bad = Splice::co_group("cg", vec![f(&["x"]), f(&["z"])], None, inner());
        assert!(matches!(
            bad.resolve(&[&a, &c]),
            Err(Error::KeyTypeMismatch { column: 0, .. })
        ));
    }

    #[derive(Debug)]
    struct AsText;

    impl ValueComparator for AsText {
        fn compare(&self, a: &Scalar, b: &Scalar) -> Ordering {
            scalar_cmp(a, b)
        }
    }

    #[test]
    fn comparator_bypasses_type_check() {
        let a = typed("a", &[("x", DataType::Int64)]);
        let c = typed("c", &[("z", DataType::Utf8)]);
        let key = f(&["z"]).set_comparator("z", Arc::new(AsText)).unwrap();
        let splice = Splice::co_group("cg", vec![f(&["x"]), key], None, inner());
        splice.resolve(&[&a, &c]).unwrap();
    }

    #[test]
    fn merge_requires_identical_fields() {
        let a = src("a", &["x", "y"]);
        let b = src("b", &["x", "y"]);
        let c = src("c", &["x", "z"]);
        Splice::merge("m").resolve(&[&a, &b]).unwrap();
        assert!(matches!(
            Splice::merge("m").resolve(&[&a, &c]),
            Err(Error::MergeSchemaMismatch { .. })
        ));
        assert!(matches!(
            Splice::group_by("g", f(&["x"])).resolve(&[&a, &c]),
            Err(Error::MergeSchemaMismatch { .. })
        ));
    }

    #[test]
    fn co_group_declares_branch_concatenation() {
        let a = src("a", &["id", "name"]);
        let b = src("b", &["bid", "score"]);
        let scope = Splice::co_group("cg", vec![f(&["id"]), f(&["bid"])], None, inner())
            .resolve(&[&a, &b])
            .unwrap();
        assert_eq!(scope.outgoing, f(&["id", "name", "bid", "score"]));
        assert_eq!(scope.grouping, f(&["id"]));
    }

    #[test]
    fn co_group_duplicate_names_need_a_declaration() {
        let a = src("a", &["id", "v"]);
        let b = src("b", &["id", "w"]);
        let keys = vec![f(&["id"]), f(&["id"])];
        assert!(matches!(
            Splice::co_group("cg", keys.clone(), None, inner()).resolve(&[&a, &b]),
            Err(Error::SchemaConflict(_))
        ));

        let declared = f(&["id1", "v", "id2", "w"]);
        let scope = Splice::co_group("cg", keys.clone(), Some(declared.clone()), inner())
            .resolve(&[&a, &b])
            .unwrap();
        assert_eq!(scope.outgoing, declared);

        let short = f(&["id1", "v"]);
        assert!(matches!(
            Splice::co_group("cg", keys, Some(short), inner()).resolve(&[&a, &b]),
            Err(Error::SchemaConflict(_))
        ));
    }

    #[test]
    fn self_join_masks_repeats() {
        let a = src("a", &["k", "v"]);
        let scope = Splice::self_join("sj", f(&["k"]), 1, None, inner())
            .resolve(&[&a])
            .unwrap();
        assert_eq!(scope.outgoing.len(), 4);
        assert_eq!(scope.outgoing.names(), vec!["k", "v"]);
        assert_eq!(scope.key_selectors.len(), 1);
    }

    #[test]
    fn hash_join_does_not_group() {
        let a = src("a", &["id"]);
        let b = src("b", &["bid"]);
        let scope = Splice::hash_join("hj", vec![f(&["id"]), f(&["bid"])], None, inner())
            .resolve(&[&a, &b])
            .unwrap();
        assert!(!scope.is_grouping());
        assert_eq!(scope.outgoing, f(&["id", "bid"]));
    }

    #[test]
    fn resolution_is_idempotent() {
        let a = src("a", &["id", "v"]);
        let b = src("b", &["bid", "w"]);
        let splice = Splice::co_group("cg", vec![f(&["id"]), f(&["bid"])], None, inner());
        let first = splice.resolve(&[&a, &b]).unwrap();
        let second = splice.resolve(&[&a, &b]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn branch_counts_are_checked() {
        let a = src("a", &["k"]);
        assert!(matches!(
            Splice::merge("m").resolve(&[&a]),
            Err(Error::InvalidAssembly(_))
        ));
        assert!(matches!(
            Splice::co_group("cg", vec![f(&["k"])], None, inner()).resolve(&[&a]),
            Err(Error::InvalidAssembly(_))
        ));
    }
}
