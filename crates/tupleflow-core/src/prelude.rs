//! Convenient re-exports for downstream crates.

pub use crate::compare::TupleComparator;
pub use crate::config::EngineConfig;
pub use crate::entry::{TupleEntry, TupleEntryMut};
pub use crate::error::{Error, Result};
pub use crate::fields::{Column, Field, Fields, Sentinel, ValueComparator};
pub use crate::id::{NodeId, SpillId};
pub use crate::scope::{Scope, ScopeKind, SpliceKind};
pub use crate::tuple::Tuple;
pub use crate::types::{DataType, FieldType, Scalar};
