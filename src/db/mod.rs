//! Database module for PulseWatch.
//!
//! Provides SQLite storage with an embedded schema migration.

mod models;
mod store;

pub use models::*;
pub use store::*;
