use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine core can raise.
///
/// All variants except `ImmutableRecordWrite`, `Coercion` and `OutOfMemory`
/// are raised while an assembly is being built, before any tuple flows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unable to resolve fields {missing:?} against {available}")]
    UnresolvedField {
        available: String,
        missing: Vec<String>,
    },

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("operation '{operation}' requires at least {required} arguments, resolved {resolved}")]
    Arity {
        operation: String,
        required: usize,
        resolved: usize,
    },

    #[error("'{node}': field declaration {declared} resolved to zero fields inside a grouping")]
    EmptyDeclaration { node: String, declared: String },

    #[error("'{node}': output selector {selector} resolved to zero fields")]
    EmptyOutput { node: String, selector: String },

    #[error("'{splice}': key fields differ in size across branches: {sizes:?}")]
    KeySizeMismatch { splice: String, sizes: Vec<usize> },

    #[error("'{splice}': key column {column} has incompatible types: {types:?}")]
    KeyTypeMismatch {
        splice: String,
        column: usize,
        types: Vec<String>,
    },

    #[error("'{splice}': merged branches must declare identical fields, found {found:?}")]
    MergeSchemaMismatch { splice: String, found: Vec<String> },

    #[error("'{node}': arguments {fields:?} were declared by a preceding aggregation in the same grouping")]
    CrossAggregatorArgument { node: String, fields: Vec<String> },

    #[error("attempted to modify a frozen tuple")]
    ImmutableRecordWrite,

    #[error("cannot coerce {value} to {target}")]
    Coercion { value: String, target: String },

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("invalid assembly: {0}")]
    InvalidAssembly(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    /// Build an `UnresolvedField` from anything printable.
    pub fn unresolved(available: impl ToString, missing: Vec<String>) -> Self {
        Error::UnresolvedField {
            available: available.to_string(),
            missing,
        }
    }

    /// True for errors raised while tuples are flowing.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Error::ImmutableRecordWrite
                | Error::Coercion { .. }
                | Error::OutOfMemory(_)
                | Error::Invariant(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
