//! Every: a per-group Aggregator or Buffer.
//!
//! Aggregators of one grouping pass form a chain: each sees the grouping key
//! plus the results of the aggregators before it as pass-through fields, but
//! may only take arguments from the group values. A Buffer sees the whole
//! group and must be the only Every of its pass.

use std::sync::Arc;

use tupleflow_core::error::{Error, Result};
use tupleflow_core::fields::{Column, Fields};
use tupleflow_core::scope::{Scope, ScopeKind};

use crate::resolver::{
    resolve_arguments, resolve_declared, resolve_output, resolve_remainder, verify_arity,
};
use crate::traits::{Aggregator, Buffer, Operation};

#[derive(Debug, Clone)]
pub enum EveryOperation {
    Aggregator(Arc<dyn Aggregator>),
    Buffer(Arc<dyn Buffer>),
}

impl EveryOperation {
    pub fn operation(&self) -> &dyn Operation {
        match self {
            EveryOperation::Aggregator(a) => a.as_ref(),
            EveryOperation::Buffer(b) => b.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Every {
    pub name: String,
    pub argument_selector: Fields,
    pub operation: EveryOperation,
    pub output_selector: Fields,
}

impl Every {
    pub fn aggregator(
        name: impl Into<String>,
        argument_selector: Fields,
        aggregator: Arc<dyn Aggregator>,
        output_selector: Fields,
    ) -> Self {
        Self {
            name: name.into(),
            argument_selector,
            operation: EveryOperation::Aggregator(aggregator),
            output_selector,
        }
    }

    pub fn buffer(
        name: impl Into<String>,
        argument_selector: Fields,
        buffer: Arc<dyn Buffer>,
        output_selector: Fields,
    ) -> Self {
        Self {
            name: name.into(),
            argument_selector,
            operation: EveryOperation::Buffer(buffer),
            output_selector,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.operation, EveryOperation::Buffer(_))
    }

    /// Resolve against the previous node of the grouping pass: the grouping
    /// splice itself or the Every before this one.
    pub fn resolve(&self, previous: &Scope) -> Result<Scope> {
        let after_every = match previous.kind {
            ScopeKind::Splice(kind) if kind.groups() => false,
            ScopeKind::Every if previous.is_grouping() => true,
            ScopeKind::Every => {
                return Err(Error::InvalidAssembly(format!(
                    "'{}' follows a Buffer; a Buffer must be the only Every of its grouping",
                    self.name
                )))
            }
            _ => {
                return Err(Error::InvalidAssembly(format!(
                    "'{}' must follow a GroupBy, a CoGroup or another Every, found '{}'",
                    self.name, previous.name
                )))
            }
        };
        let output = &self.output_selector;
        if output.is_args() || output.is_swap() || output.is_replace() {
            return Err(Error::InvalidAssembly(format!(
                "'{}': an Every emits ALL, RESULTS or named fields, not {}",
                self.name, self.output_selector
            )));
        }
        if self.is_buffer() && after_every {
            return Err(Error::InvalidAssembly(format!(
                "Buffer '{}' must be the only Every of its grouping",
                self.name
            )));
        }

        let grouping = previous.grouping.clone();
        let values = previous.values.clone();
        let pass_through = if after_every {
            previous.outgoing.clone()
        } else {
            grouping.clone()
        };
        let prior_results = if after_every {
            results_without_grouping(&previous.outgoing, &grouping)?
        } else {
            Fields::none()
        };

        let arguments = resolve_arguments(&self.argument_selector, &values, &grouping)
            .map_err(|e| self.cross_aggregator_check(e, &prior_results))?;

        let op = self.operation.operation();
        verify_arity(op.name(), op.arity(), &arguments)?;

        let declared = resolve_declared(
            &self.name,
            &op.declared_fields(),
            &arguments,
            &pass_through,
            &self.output_selector,
            true,
        )?;
        let outgoing = resolve_output(
            &self.name,
            &self.output_selector,
            &arguments,
            &declared,
            &pass_through,
        )?;
        let remainder = resolve_remainder(&values, &arguments)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(node = %self.name, %arguments, %declared, %outgoing, "resolved every");

        // A Buffer closes its grouping pass.
        let (grouping, values) = if self.is_buffer() {
            (Fields::none(), Fields::none())
        } else {
            (grouping, values)
        };

        Ok(Scope {
            name: self.name.clone(),
            kind: ScopeKind::Every,
            arguments,
            declared,
            outgoing,
            grouping,
            values,
            pass_through,
            remainder,
            key_selectors: Vec::new(),
            sorting_selectors: Vec::new(),
        })
    }

    fn cross_aggregator_check(&self, err: Error, prior_results: &Fields) -> Error {
        let Error::UnresolvedField { ref missing, .. } = err else {
            return err;
        };
        let offending: Vec<String> = prior_results
            .iter()
            .map(|f| f.to_string())
            .filter(|f| missing.contains(f))
            .collect();
        if offending.is_empty() {
            err
        } else {
            Error::CrossAggregatorArgument {
                node: self.name.clone(),
                fields: offending,
            }
        }
    }
}

/// Columns of `outgoing` that are not part of the grouping key.
fn results_without_grouping(outgoing: &Fields, grouping: &Fields) -> Result<Fields> {
    if !outgoing.is_defined() {
        return Ok(Fields::none());
    }
    let columns: Vec<Column> = outgoing
        .columns()
        .iter()
        .filter(|c| grouping.index_of_safe(&c.field).is_none() || c.field.is_pos())
        .cloned()
        .collect();
    Fields::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Count, FirstN, Sum};
    use crate::splice::Splice;

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    fn grouped() -> Scope {
        let src = Scope::source("src", f(&["k", "v"]));
        Splice::group_by("g", f(&["k"])).resolve(&[&src]).unwrap()
    }

    #[test]
    fn aggregator_chain_accumulates_results() {
        let g = grouped();
        let count = Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all());
        let c = count.resolve(&g).unwrap();
        assert_eq!(c.outgoing, f(&["k", "n"]));

        let sum = Every::aggregator("sum", f(&["v"]), Arc::new(Sum::new("total")), Fields::all());
        let s = sum.resolve(&c).unwrap();
        assert_eq!(s.outgoing, f(&["k", "n", "total"]));
        assert_eq!(s.pass_through, f(&["k", "n"]));
    }

    #[test]
    fn aggregate_results_cannot_feed_the_next_aggregator() {
        let g = grouped();
        let count = Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all());
        let c = count.resolve(&g).unwrap();
        let sum = Every::aggregator("sum", f(&["n"]), Arc::new(Sum::new("total")), Fields::all());
        match sum.resolve(&c).unwrap_err() {
            Error::CrossAggregatorArgument { node, fields } => {
                assert_eq!(node, "sum");
                assert_eq!(fields, vec!["'n'".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn every_requires_a_grouping() {
        let src = Scope::source("src", f(&["k"]));
        let count = Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all());
        assert!(matches!(count.resolve(&src), Err(Error::InvalidAssembly(_))));
    }

    #[test]
    fn buffer_must_be_alone() {
        let g = grouped();
        let count = Every::aggregator("count", Fields::all(), Arc::new(Count::new("n")), Fields::all());
        let c = count.resolve(&g).unwrap();
        let top = Every::buffer("top", Fields::all(), Arc::new(FirstN::new(2)), Fields::results());
        assert!(matches!(top.resolve(&c), Err(Error::InvalidAssembly(_))));

        let b = top.resolve(&g).unwrap();
        assert_eq!(b.outgoing, f(&["k", "v"]));
        assert!(matches!(count.resolve(&b), Err(Error::InvalidAssembly(_))));
    }

    #[test]
    fn empty_declaration_inside_grouping_fails() {
        let g = grouped();
        let count = Every::aggregator(
            "count",
            Fields::all(),
            Arc::new(Count::with_fields(Fields::empty())),
            Fields::all(),
        );
        assert!(matches!(
            count.resolve(&g),
            Err(Error::EmptyDeclaration { .. })
        ));
    }
}
