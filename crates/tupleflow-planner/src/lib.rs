#![forbid(unsafe_code)]
//! tupleflow-planner: operator graphs built bottom-up with eager resolution.
//!
//! Design:
//! - An `Assembly` is an arena of nodes addressed by `NodeId`; parents always
//!   precede their children, so arena order is a topological order.
//! - Every constructor resolves the new node's `Scope` immediately. A node
//!   whose scope fails to resolve is never added.
//! - `splice_plans()` is what a runtime reads once, before any tuple flows, to
//!   learn the resolved key and sort fields of every splice.

pub mod assembly;
pub mod physical;

pub use assembly::{Assembly, Node};
pub use physical::SplicePlan;
