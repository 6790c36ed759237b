//! Per-key value assembly for splices.

pub mod buffer;
pub mod closure;
pub mod joiner;

pub use buffer::{BufferIter, SpillContext, ValueBuffer};
pub use closure::{GroupClosure, GroupIter, JoinClosure, JoinIter, JoinStats};
pub use joiner::{BranchMode, InnerJoin, Joiner, LeftJoin, MixedJoin, OuterJoin, RightJoin};
