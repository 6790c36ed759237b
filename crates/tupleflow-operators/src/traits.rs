//! Operation contracts.
//!
//! An Each node runs a [`Function`] or a [`Filter`] per tuple. An Every node
//! runs an [`Aggregator`] or a [`Buffer`] per group. All of them declare the
//! fields they produce and the minimum number of arguments they need; both
//! are checked when the assembly is built, before any tuple flows.

use std::fmt;

use thiserror::Error;

use tupleflow_core::entry::TupleEntry;
use tupleflow_core::fields::Fields;
use tupleflow_core::tuple::Tuple;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Core(#[from] tupleflow_core::Error),

    #[error("execution error: {0}")]
    Exec(String),
}

impl From<tupleflow_mem::Error> for OpError {
    fn from(e: tupleflow_mem::Error) -> Self {
        OpError::Core(e.into())
    }
}

impl OpError {
    /// The core error, if this wraps one.
    pub fn core(&self) -> Option<&tupleflow_core::Error> {
        match self {
            OpError::Core(e) => Some(e),
            OpError::Exec(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OpError>;

/// Minimum number of arguments an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Any,
    AtLeast(usize),
}

/// Receives the tuples an operation emits.
#[derive(Debug, Default)]
pub struct Collector {
    tuples: Vec<Tuple>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Tuple> {
        self.tuples.drain(..)
    }
}

pub trait Operation: Send + Sync + fmt::Debug {
    /// Stable operation name used in errors and logs.
    fn name(&self) -> &str;

    fn arity(&self) -> Arity {
        Arity::Any
    }

    /// Fields this operation emits. `Fields::args()` means "the same fields as
    /// my arguments"; `Fields::unknown()` defers the check to run time.
    fn declared_fields(&self) -> Fields {
        Fields::unknown()
    }
}

/// Per-tuple transform emitting zero or more result tuples.
pub trait Function: Operation {
    fn operate(&self, args: &TupleEntry<'_>, out: &mut Collector) -> Result<()>;
}

/// Per-tuple predicate. A filter never changes the tuple it lets through.
pub trait Filter: Operation {
    fn is_remove(&self, args: &TupleEntry<'_>) -> Result<bool>;
}

/// Per-group state of an [`Aggregator`].
pub trait Accumulator: Send {
    fn aggregate(&mut self, args: &TupleEntry<'_>) -> Result<()>;
    fn complete(self: Box<Self>, out: &mut Collector) -> Result<()>;
}

/// Per-group reduction; sees each value once, in order.
pub trait Aggregator: Operation {
    fn start(&self, group: &TupleEntry<'_>) -> Result<Box<dyn Accumulator>>;
}

/// The argument tuples of one group, handed to a [`Buffer`].
pub struct GroupArguments<'a> {
    fields: &'a Fields,
    inner: Box<dyn Iterator<Item = Result<Tuple>> + 'a>,
}

impl<'a> GroupArguments<'a> {
    pub fn new(fields: &'a Fields, inner: Box<dyn Iterator<Item = Result<Tuple>> + 'a>) -> Self {
        Self { fields, inner }
    }

    pub fn fields(&self) -> &'a Fields {
        self.fields
    }
}

impl Iterator for GroupArguments<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Per-group operation with access to the whole group at once.
pub trait Buffer: Operation {
    fn operate(
        &self,
        group: &TupleEntry<'_>,
        args: &mut GroupArguments<'_>,
        out: &mut Collector,
    ) -> Result<()>;
}
