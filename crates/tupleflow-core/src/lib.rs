//! tupleflow-core: field algebra, tuples and shared types for the tupleflow engine.
//!
//! Everything here is plain data; no I/O happens in this crate.

#![forbid(unsafe_code)]

pub mod budget;
pub mod compare;
pub mod config;
pub mod entry;
pub mod error;
pub mod fields;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod scope;
pub mod tuple;
pub mod types;

pub use error::{Error, Result};
