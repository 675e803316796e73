//! Database Backend Abstractions
//!
//! Narrow SQL execution interface used by the provisioner and the migration
//! applier, with the sqlx Postgres implementation that reaches CockroachDB.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use postgres::{PostgresBackend, PostgresPool};
