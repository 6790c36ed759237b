//! Built-in operations.

use tupleflow_core::entry::TupleEntry;
use tupleflow_core::fields::{Column, Fields};
use tupleflow_core::tuple::Tuple;
use tupleflow_core::types::{DataType, FieldType, Scalar};

use crate::traits::{
    Accumulator, Aggregator, Arity, Buffer, Collector, Filter, Function, GroupArguments,
    Operation, Result,
};

/// Emits its arguments unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Operation for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn declared_fields(&self) -> Fields {
        Fields::args()
    }
}

impl Function for Identity {
    fn operate(&self, args: &TupleEntry<'_>, out: &mut Collector) -> Result<()> {
        out.add(Tuple::new(args.tuple().values().to_vec()));
        Ok(())
    }
}

/// Emits the same constant values for every input.
#[derive(Debug, Clone)]
pub struct Insert {
    declared: Fields,
    values: Tuple,
}

impl Insert {
    pub fn new(declared: Fields, values: Tuple) -> Self {
        Self { declared, values }
    }
}

impl Operation for Insert {
    fn name(&self) -> &str {
        "insert"
    }

    fn declared_fields(&self) -> Fields {
        self.declared.clone()
    }
}

impl Function for Insert {
    fn operate(&self, _args: &TupleEntry<'_>, out: &mut Collector) -> Result<()> {
        out.add(Tuple::new(self.values.values().to_vec()));
        Ok(())
    }
}

/// Removes tuples with a null argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterNull;

impl Operation for FilterNull {
    fn name(&self) -> &str {
        "filter_null"
    }
}

impl Filter for FilterNull {
    fn is_remove(&self, args: &TupleEntry<'_>) -> Result<bool> {
        Ok(args.tuple().values().iter().any(Scalar::is_null))
    }
}

/// Keeps only tuples with at least one null argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterNotNull;

impl Operation for FilterNotNull {
    fn name(&self) -> &str {
        "filter_not_null"
    }
}

impl Filter for FilterNotNull {
    fn is_remove(&self, args: &TupleEntry<'_>) -> Result<bool> {
        Ok(args.tuple().values().iter().all(|v| !v.is_null()))
    }
}

/// Number of values in the group.
#[derive(Debug, Clone)]
pub struct Count {
    declared: Fields,
}

impl Count {
    pub fn new(name: &str) -> Self {
        Self::with_fields(Column::typed(name, FieldType::required(DataType::Int64)).into())
    }

    pub fn with_fields(declared: Fields) -> Self {
        Self { declared }
    }
}

impl Operation for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn declared_fields(&self) -> Fields {
        self.declared.clone()
    }
}

struct CountState(i64);

impl Accumulator for CountState {
    fn aggregate(&mut self, _args: &TupleEntry<'_>) -> Result<()> {
        self.0 += 1;
        Ok(())
    }

    fn complete(self: Box<Self>, out: &mut Collector) -> Result<()> {
        out.add(Tuple::of([self.0]));
        Ok(())
    }
}

impl Aggregator for Count {
    fn start(&self, _group: &TupleEntry<'_>) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(CountState(0)))
    }
}

/// Sum of the first argument as a double; nulls are skipped.
#[derive(Debug, Clone)]
pub struct Sum {
    declared: Fields,
}

impl Sum {
    pub fn new(name: &str) -> Self {
        Self {
            declared: Column::typed(name, FieldType::required(DataType::Float64)).into(),
        }
    }
}

impl Operation for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn declared_fields(&self) -> Fields {
        self.declared.clone()
    }
}

struct SumState(f64);

impl Accumulator for SumState {
    fn aggregate(&mut self, args: &TupleEntry<'_>) -> Result<()> {
        if let Some(v) = args.get_f64(0)? {
            self.0 += v;
        }
        Ok(())
    }

    fn complete(self: Box<Self>, out: &mut Collector) -> Result<()> {
        out.add(Tuple::of([self.0]));
        Ok(())
    }
}

impl Aggregator for Sum {
    fn start(&self, _group: &TupleEntry<'_>) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(SumState(0.0)))
    }
}

/// The arguments of the first value in the group.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

impl Operation for First {
    fn name(&self) -> &str {
        "first"
    }

    fn declared_fields(&self) -> Fields {
        Fields::args()
    }
}

struct FirstState(Option<Tuple>);

impl Accumulator for FirstState {
    fn aggregate(&mut self, args: &TupleEntry<'_>) -> Result<()> {
        if self.0.is_none() {
            self.0 = Some(Tuple::new(args.tuple().values().to_vec()));
        }
        Ok(())
    }

    fn complete(self: Box<Self>, out: &mut Collector) -> Result<()> {
        if let Some(t) = self.0 {
            out.add(t);
        }
        Ok(())
    }
}

impl Aggregator for First {
    fn start(&self, _group: &TupleEntry<'_>) -> Result<Box<dyn Accumulator>> {
        Ok(Box::new(FirstState(None)))
    }
}

/// Emits the arguments of the first `n` values of the group.
#[derive(Debug, Clone, Copy)]
pub struct FirstN {
    n: usize,
}

impl FirstN {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Operation for FirstN {
    fn name(&self) -> &str {
        "first_n"
    }

    fn declared_fields(&self) -> Fields {
        Fields::args()
    }
}

impl Buffer for FirstN {
    fn operate(
        &self,
        _group: &TupleEntry<'_>,
        args: &mut GroupArguments<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        for t in args.take(self.n) {
            out.add(t?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_of<'a>(fields: &'a Fields, tuple: &'a Tuple) -> TupleEntry<'a> {
        TupleEntry::new(fields, tuple)
    }

    #[test]
    fn filters() {
        let fields = Fields::new(["a", "b"]).unwrap();
        let with_null = Tuple::new(vec![Scalar::from(1), Scalar::Null]);
        let full = Tuple::of([1, 2]);
        assert!(FilterNull.is_remove(&entry_of(&fields, &with_null)).unwrap());
        assert!(!FilterNull.is_remove(&entry_of(&fields, &full)).unwrap());
        assert!(!FilterNotNull.is_remove(&entry_of(&fields, &with_null)).unwrap());
        assert!(FilterNotNull.is_remove(&entry_of(&fields, &full)).unwrap());
    }

    #[test]
    fn sum_skips_nulls() {
        let fields = Fields::new(["v"]).unwrap();
        let key = Tuple::default();
        let none = Fields::none();
        let mut acc = Sum::new("total").start(&entry_of(&none, &key)).unwrap();
        for v in [Scalar::from(2), Scalar::Null, Scalar::from(3.5)] {
            let t = Tuple::new(vec![v]);
            acc.aggregate(&entry_of(&fields, &t)).unwrap();
        }
        let mut out = Collector::new();
        acc.complete(&mut out).unwrap();
        let results: Vec<Tuple> = out.drain().collect();
        assert_eq!(results, vec![Tuple::of([5.5])]);
    }

    #[test]
    fn count_declares_a_typed_column() {
        let declared = Count::new("n").declared_fields();
        assert_eq!(declared.names(), vec!["n"]);
        assert_eq!(declared.field_type(0), Some(FieldType::required(DataType::Int64)));
    }

    #[test]
    fn first_n_stops_early() {
        let fields = Fields::new(["v"]).unwrap();
        let values = (0..10).map(|i| Ok::<_, crate::traits::OpError>(Tuple::of([i])));
        let mut args = GroupArguments::new(&fields, Box::new(values));
        let key = Tuple::default();
        let none = Fields::none();
        let mut out = Collector::new();
        FirstN::new(3)
            .operate(&entry_of(&none, &key), &mut args, &mut out)
            .unwrap();
        assert_eq!(out.len(), 3);
    }
}
