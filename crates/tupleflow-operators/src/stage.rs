//! Runtime stages: apply a resolved node to tuples.
//!
//! Stages are built once from a node and its resolved [`Scope`]; every
//! position they need is computed at build time, so per-tuple work is plain
//! indexing.

use std::sync::Arc;

use tupleflow_core::entry::TupleEntry;
use tupleflow_core::error::Error;
use tupleflow_core::fields::{Fields, Sentinel};
use tupleflow_core::scope::Scope;
use tupleflow_core::tuple::Tuple;

use crate::each::{Each, EachOperation};
use crate::every::{Every, EveryOperation};
use crate::traits::{
    Accumulator, Aggregator, Buffer, Collector, GroupArguments, OpError, Result,
};

/// How to cut a sub-tuple out of a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Positions(Vec<usize>),
}

impl Projection {
    /// Projection taking `selected` out of tuples shaped like `from`.
    pub fn resolve(selected: &Fields, from: &Fields) -> tupleflow_core::Result<Self> {
        if selected.is_all() || (selected.is_unknown() && from.is_unknown()) {
            return Ok(Projection::All);
        }
        if from.is_unknown() && !selected.is_none() {
            return Err(Error::SchemaConflict(format!(
                "cannot locate {selected} in tuples of unknown fields"
            )));
        }
        if selected.is_defined() && *selected == *from {
            return Ok(Projection::All);
        }
        Ok(Projection::Positions(from.pos(selected)?))
    }

    pub fn apply(&self, tuple: &Tuple) -> Result<Tuple> {
        match self {
            Projection::All => Ok(Tuple::new(tuple.values().to_vec())),
            Projection::Positions(p) => Ok(tuple.select(p)?),
        }
    }
}

/// How the outgoing tuple is assembled from the incoming tuple and a result.
#[derive(Debug, Clone)]
enum Output {
    Pass,
    Results,
    Args,
    Swap(Projection),
    Replace(Vec<usize>),
    Concat,
    Select(Vec<usize>),
}

impl Output {
    fn resolve(selector: &Fields, scope: &Scope) -> tupleflow_core::Result<Self> {
        let incoming = &scope.pass_through;
        Ok(match selector.sentinel() {
            Some(Sentinel::Results) => Output::Results,
            Some(Sentinel::Args) => Output::Args,
            Some(Sentinel::All) => Output::Concat,
            Some(Sentinel::Swap) => Output::Swap(Projection::resolve(&scope.remainder, incoming)?),
            Some(Sentinel::Replace) => Output::Replace(incoming.pos(&scope.arguments)?),
            Some(other) => {
                return Err(Error::SchemaConflict(format!(
                    "'{}': cannot build output for {other}",
                    scope.name
                )))
            }
            None => Output::Select(Fields::positions_across(
                selector,
                &[incoming, &scope.declared],
            )?),
        })
    }

    fn assemble(&self, incoming: &Tuple, args: &Tuple, result: &Tuple) -> Result<Tuple> {
        Ok(match self {
            Output::Pass => Tuple::new(incoming.values().to_vec()),
            Output::Results => Tuple::new(result.values().to_vec()),
            Output::Args => Tuple::new(args.values().to_vec()),
            Output::Swap(remainder) => remainder.apply(incoming)?.append(&[result]),
            Output::Replace(positions) => {
                let mut out = Tuple::new(incoming.values().to_vec());
                out.set_all(positions, result)?;
                out
            }
            Output::Concat => incoming.append(&[result]),
            Output::Select(positions) => incoming.append(&[result]).select(positions)?,
        })
    }
}

/// Checks a result against what the operation declared and coerces it
/// through the declared types.
fn conform(node: &str, declared: &Fields, result: Tuple) -> Result<Tuple> {
    if !declared.is_defined() {
        return Ok(result);
    }
    if result.len() != declared.len() {
        return Err(OpError::Exec(format!(
            "'{node}' emitted {} values, declared {declared}",
            result.len()
        )));
    }
    Ok(result.coerce(declared)?)
}

/// A Function or Filter applied to one tuple at a time.
#[derive(Debug, Clone)]
pub struct EachStage {
    name: String,
    operation: EachOperation,
    arguments: Fields,
    argument_projection: Projection,
    declared: Fields,
    output: Output,
}

impl EachStage {
    pub fn new(each: &Each, scope: &Scope) -> tupleflow_core::Result<Self> {
        let output = match each.operation {
            EachOperation::Filter(_) => Output::Pass,
            EachOperation::Function(_) => Output::resolve(&each.output_selector, scope)?,
        };
        Ok(Self {
            name: each.name.clone(),
            operation: each.operation.clone(),
            arguments: scope.arguments.clone(),
            argument_projection: Projection::resolve(&scope.arguments, &scope.pass_through)?,
            declared: scope.declared.clone(),
            output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the operation to `input`, appending outgoing tuples to `out`.
    pub fn process(&self, input: &Tuple, out: &mut Vec<Tuple>) -> Result<()> {
        let args = self.argument_projection.apply(input)?;
        let entry = TupleEntry::new(&self.arguments, &args);
        match &self.operation {
            EachOperation::Filter(filter) => {
                if !filter.is_remove(&entry)? {
                    out.push(Tuple::new(input.values().to_vec()).frozen());
                }
            }
            EachOperation::Function(function) => {
                let mut collector = Collector::new();
                function.operate(&entry, &mut collector)?;
                for result in collector.drain() {
                    let result = conform(&self.name, &self.declared, result)?;
                    out.push(self.output.assemble(input, &args, &result)?.frozen());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum LinkOperation {
    Aggregator(Arc<dyn Aggregator>),
    Buffer(Arc<dyn Buffer>),
}

#[derive(Debug, Clone)]
struct Link {
    name: String,
    operation: LinkOperation,
    arguments: Fields,
    argument_projection: Projection,
    declared: Fields,
    output: Output,
}

/// Every Every node of one grouping pass, run in a single scan per group.
#[derive(Debug, Clone)]
pub struct AggregateChain {
    grouping: Fields,
    links: Vec<Link>,
    outgoing: Fields,
}

impl AggregateChain {
    /// `splice` is the scope of the grouping splice; `everies` the chain in
    /// order, each with its resolved scope.
    pub fn new(splice: &Scope, everies: &[(&Every, &Scope)]) -> tupleflow_core::Result<Self> {
        if everies.is_empty() {
            return Err(Error::InvalidAssembly(format!(
                "'{}': an aggregate chain needs at least one Every",
                splice.name
            )));
        }
        if everies.len() > 1 && everies.iter().any(|(e, _)| e.is_buffer()) {
            return Err(Error::InvalidAssembly(format!(
                "'{}': a Buffer must be the only Every of its grouping",
                splice.name
            )));
        }

        let mut links = Vec::with_capacity(everies.len());
        for (every, scope) in everies {
            let operation = match &every.operation {
                EveryOperation::Aggregator(a) => LinkOperation::Aggregator(a.clone()),
                EveryOperation::Buffer(b) => LinkOperation::Buffer(b.clone()),
            };
            links.push(Link {
                name: every.name.clone(),
                operation,
                arguments: scope.arguments.clone(),
                argument_projection: Projection::resolve(&scope.arguments, &splice.values)?,
                declared: scope.declared.clone(),
                output: Output::resolve(&every.output_selector, scope)?,
            });
        }
        let outgoing = everies
            .last()
            .map(|(_, s)| s.outgoing.clone())
            .unwrap_or_else(Fields::unknown);

        Ok(Self {
            grouping: splice.grouping.clone(),
            links,
            outgoing,
        })
    }

    pub fn outgoing(&self) -> &Fields {
        &self.outgoing
    }

    /// Aggregate one group. `key` is the grouping tuple; `values` the group.
    pub fn run<I>(&self, key: &Tuple, values: I) -> Result<Vec<Tuple>>
    where
        I: Iterator<Item = Result<Tuple>>,
    {
        let group = TupleEntry::new(&self.grouping, key);

        if let [link] = self.links.as_slice() {
            if let LinkOperation::Buffer(buffer) = &link.operation {
                return self.run_buffer(link, buffer.as_ref(), key, &group, values);
            }
        }

        let mut accumulators: Vec<Box<dyn Accumulator>> = Vec::with_capacity(self.links.len());
        for link in &self.links {
            match &link.operation {
                LinkOperation::Aggregator(a) => accumulators.push(a.start(&group)?),
                LinkOperation::Buffer(_) => {
                    return Err(OpError::Exec(format!(
                        "'{}': buffer inside an aggregator chain",
                        link.name
                    )))
                }
            }
        }

        for value in values {
            let value = value?;
            for (link, acc) in self.links.iter().zip(accumulators.iter_mut()) {
                let args = link.argument_projection.apply(&value)?;
                acc.aggregate(&TupleEntry::new(&link.arguments, &args))?;
            }
        }

        let mut current = vec![Tuple::new(key.values().to_vec())];
        for (link, acc) in self.links.iter().zip(accumulators) {
            let mut collector = Collector::new();
            acc.complete(&mut collector)?;
            let results = collector
                .drain()
                .map(|r| conform(&link.name, &link.declared, r))
                .collect::<Result<Vec<_>>>()?;

            let mut next = Vec::with_capacity(current.len() * results.len());
            for c in &current {
                for r in &results {
                    next.push(link.output.assemble(c, &Tuple::default(), r)?);
                }
            }
            current = next;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%key, emitted = current.len(), "aggregated group");

        Ok(current.into_iter().map(Tuple::frozen).collect())
    }

    fn run_buffer<I>(
        &self,
        link: &Link,
        buffer: &dyn Buffer,
        key: &Tuple,
        group: &TupleEntry<'_>,
        values: I,
    ) -> Result<Vec<Tuple>>
    where
        I: Iterator<Item = Result<Tuple>>,
    {
        let projection = &link.argument_projection;
        let inner = values.map(move |v| v.and_then(|t| projection.apply(&t)));
        let mut args = GroupArguments::new(&link.arguments, Box::new(inner));
        let mut collector = Collector::new();
        buffer.operate(group, &mut args, &mut collector)?;

        let mut out = Vec::with_capacity(collector.len());
        for result in collector.drain() {
            let result = conform(&link.name, &link.declared, result)?;
            out.push(link.output.assemble(key, &Tuple::default(), &result)?.frozen());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Count, FilterNull, First, FirstN, Identity, Insert, Sum};
    use crate::splice::Splice;
    use tupleflow_core::types::{DataType, FieldType, Scalar};

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    fn run_each(each: &Each, incoming: &Scope, input: Tuple) -> Vec<Tuple> {
        let scope = each.resolve(incoming).unwrap();
        let stage = EachStage::new(each, &scope).unwrap();
        let mut out = Vec::new();
        stage.process(&input, &mut out).unwrap();
        out
    }

    #[test]
    fn each_output_selectors() {
        let src = Scope::source("src", f(&["a", "b"]));
        let input = Tuple::of(["x", "y"]);
        let tag = || Arc::new(Insert::new(f(&["t"]), Tuple::of(["z"])));

        let all = Each::function("e", Fields::none(), tag(), Fields::all());
        assert_eq!(run_each(&all, &src, input.clone()), vec![Tuple::of(["x", "y", "z"])]);

        let results = Each::function("e", Fields::none(), tag(), Fields::results());
        assert_eq!(run_each(&results, &src, input.clone()), vec![Tuple::of(["z"])]);

        let picked = Each::function("e", Fields::none(), tag(), f(&["t", "a"]));
        assert_eq!(run_each(&picked, &src, input.clone()), vec![Tuple::of(["z", "x"])]);

        let swap = Each::function("e", f(&["a"]), Arc::new(Identity), Fields::swap());
        assert_eq!(run_each(&swap, &src, input.clone()), vec![Tuple::of(["y", "x"])]);

        let out = run_each(&all, &src, input);
        assert!(out[0].is_frozen());
    }

    #[test]
    fn replace_writes_over_arguments_with_coercion() {
        let src = Scope::source(
            "src",
            Fields::typed([
                ("a", FieldType::required(DataType::Utf8)),
                ("b", FieldType::required(DataType::Utf8)),
            ])
            .unwrap(),
        );
        let declared =
            Fields::typed([(0, FieldType::required(DataType::Int64))]).unwrap();
        let each = Each::function(
            "parse",
            f(&["b"]),
            Arc::new(Insert::new(declared, Tuple::of(["42"]))),
            Fields::replace(),
        );
        let out = run_each(&each, &src, Tuple::of(["x", "1"]));
        assert_eq!(out, vec![Tuple::new(vec![Scalar::from("x"), Scalar::I64(42)])]);
    }

    #[test]
    fn filters_drop_or_pass_whole_tuples() {
        let src = Scope::source("src", f(&["a", "b"]));
        let each = Each::filter("nn", f(&["b"]), Arc::new(FilterNull));
        assert!(run_each(&each, &src, Tuple::new(vec![Scalar::from(1), Scalar::Null])).is_empty());
        assert_eq!(run_each(&each, &src, Tuple::of([1, 2])).len(), 1);
    }

    #[test]
    fn declared_size_is_enforced_at_run_time() {
        let src = Scope::source("src", f(&["a"]));
        let each = Each::function(
            "bad",
            Fields::none(),
            Arc::new(Insert::new(f(&["x", "y"]), Tuple::of(["only one"]))),
            Fields::all(),
        );
        let scope = each.resolve(&src).unwrap();
        let stage = EachStage::new(&each, &scope).unwrap();
        let err = stage.process(&Tuple::of(["a"]), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, OpError::Exec(_)));
    }

    fn grouped() -> Scope {
        let src = Scope::source("src", f(&["k", "v"]));
        Splice::group_by("g", f(&["k"])).resolve(&[&src]).unwrap()
    }

    fn group_values() -> impl Iterator<Item = Result<Tuple>> {
        vec![Tuple::of([1, 10]), Tuple::of([1, 20]), Tuple::of([1, 30])]
            .into_iter()
            .map(Ok)
    }

    #[test]
    fn aggregate_chain_composes_key_and_results() {
        let g = grouped();
        let count = Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all());
        let c = count.resolve(&g).unwrap();
        let sum = Every::aggregator("sum", f(&["v"]), Arc::new(Sum::new("total")), Fields::all());
        let s = sum.resolve(&c).unwrap();

        let chain = AggregateChain::new(&g, &[(&count, &c), (&sum, &s)]).unwrap();
        let out = chain.run(&Tuple::of([1]), group_values()).unwrap();
        assert_eq!(
            out,
            vec![Tuple::new(vec![Scalar::I32(1), Scalar::I64(3), Scalar::F64(60.0)])]
        );
        assert_eq!(chain.outgoing(), &f(&["k", "n", "total"]));
    }

    #[test]
    fn aggregate_results_only() {
        let g = grouped();
        let first = Every::aggregator("first", f(&["v"]), Arc::new(First), Fields::results());
        let s = first.resolve(&g).unwrap();
        let chain = AggregateChain::new(&g, &[(&first, &s)]).unwrap();
        assert_eq!(chain.run(&Tuple::of([1]), group_values()).unwrap(), vec![Tuple::of([10])]);
    }

    #[test]
    fn buffer_sees_the_whole_group() {
        let g = grouped();
        let top = Every::buffer("top", f(&["v"]), Arc::new(FirstN::new(2)), Fields::all());
        let s = top.resolve(&g).unwrap();
        assert_eq!(s.outgoing, f(&["k", "v"]));
        let chain = AggregateChain::new(&g, &[(&top, &s)]).unwrap();
        let out = chain.run(&Tuple::of([1]), group_values()).unwrap();
        assert_eq!(out, vec![Tuple::of([1, 10]), Tuple::of([1, 20])]);
    }
}
