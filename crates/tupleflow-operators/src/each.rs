//! Each: a per-tuple Function or Filter.

use std::sync::Arc;

use tupleflow_core::error::Result;
use tupleflow_core::fields::Fields;
use tupleflow_core::scope::{Scope, ScopeKind};

use crate::resolver::{
    resolve_arguments, resolve_declared, resolve_output, resolve_remainder, verify_arity,
};
use crate::traits::{Filter, Function, Operation};

#[derive(Debug, Clone)]
pub enum EachOperation {
    Function(Arc<dyn Function>),
    Filter(Arc<dyn Filter>),
}

impl EachOperation {
    pub fn operation(&self) -> &dyn Operation {
        match self {
            EachOperation::Function(f) => f.as_ref(),
            EachOperation::Filter(f) => f.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Each {
    pub name: String,
    pub argument_selector: Fields,
    pub operation: EachOperation,
    pub output_selector: Fields,
}

impl Each {
    pub fn function(
        name: impl Into<String>,
        argument_selector: Fields,
        function: Arc<dyn Function>,
        output_selector: Fields,
    ) -> Self {
        Self {
            name: name.into(),
            argument_selector,
            operation: EachOperation::Function(function),
            output_selector,
        }
    }

    /// A filter lets the whole incoming tuple through or drops it.
    pub fn filter(
        name: impl Into<String>,
        argument_selector: Fields,
        filter: Arc<dyn Filter>,
    ) -> Self {
        Self {
            name: name.into(),
            argument_selector,
            operation: EachOperation::Filter(filter),
            output_selector: Fields::all(),
        }
    }

    /// Resolve this node against the scope of its single parent.
    pub fn resolve(&self, incoming: &Scope) -> Result<Scope> {
        let available = &incoming.outgoing;
        let op = self.operation.operation();

        let arguments = resolve_arguments(&self.argument_selector, available, &Fields::none())?;
        verify_arity(op.name(), op.arity(), &arguments)?;

        let (declared, outgoing) = match &self.operation {
            EachOperation::Filter(_) => (available.clone(), available.clone()),
            EachOperation::Function(f) => {
                let declared = resolve_declared(
                    &self.name,
                    &f.declared_fields(),
                    &arguments,
                    available,
                    &self.output_selector,
                    false,
                )?;
                let outgoing = resolve_output(
                    &self.name,
                    &self.output_selector,
                    &arguments,
                    &declared,
                    available,
                )?;
                (declared, outgoing)
            }
        };
        let remainder = resolve_remainder(available, &arguments)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(node = %self.name, %arguments, %declared, %outgoing, "resolved each");

        Ok(Scope {
            name: self.name.clone(),
            kind: ScopeKind::Each,
            arguments,
            declared,
            outgoing,
            grouping: Fields::none(),
            values: Fields::none(),
            pass_through: available.clone(),
            remainder,
            key_selectors: Vec::new(),
            sorting_selectors: Vec::new(),
        })
    }
}
