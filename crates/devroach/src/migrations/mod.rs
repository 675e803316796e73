//! Versionless SQL migrations
//!
//! Migrations are plain SQL files picked out of a file tree by glob patterns
//! and applied forward-only. Nothing records which files already ran; a
//! source is expected to be applied once, to a fresh instance.

pub mod applier;
pub mod loader;
pub mod source;

pub use applier::{apply, migrate};
pub use loader::{load, MigrationBatch, MigrationScript};
pub use source::{DirFs, MemoryFs, MigrationFs, MigrationSource};
