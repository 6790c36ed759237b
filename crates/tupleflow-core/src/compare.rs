use std::cmp::Ordering;
use std::sync::Arc;

use crate::fields::{Fields, ValueComparator};
use crate::tuple::Tuple;
use crate::types::{scalar_cmp, Scalar};

/// Column-wise tuple ordering with optional per-column comparators.
#[derive(Debug, Clone, Default)]
pub struct TupleComparator {
    comparators: Vec<Option<Arc<dyn ValueComparator>>>,
    reverse: bool,
}

impl TupleComparator {
    pub fn natural() -> Self {
        Self::default()
    }

    /// Comparator honoring the comparators attached to `fields`.
    pub fn from_fields(fields: &Fields) -> Self {
        Self {
            comparators: fields.columns().iter().map(|c| c.comparator.clone()).collect(),
            reverse: false,
        }
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    fn compare_value(&self, i: usize, a: &Scalar, b: &Scalar) -> Ordering {
        match self.comparators.get(i).and_then(Option::as_ref) {
            Some(c) => c.compare(a, b),
            None => scalar_cmp(a, b),
        }
    }

    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        let ord = a
            .values()
            .iter()
            .zip(b.values())
            .enumerate()
            .map(|(i, (x, y))| self.compare_value(i, x, y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len()));
        if self.reverse {
            ord.reverse()
        } else {
            ord
        }
    }
}
