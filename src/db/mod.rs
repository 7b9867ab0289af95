//! High-level Database API.
//!
//! This module provides the user-facing handle: working-set edits, staging
//! and commits, and resolution of the system tables by name.

mod api;

pub use api::{Database, DatabaseConfig, DatabaseError, DatabaseResult, SystemTable};
