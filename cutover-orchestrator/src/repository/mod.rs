//! Repository Module
//!
//! Data access layer for the orchestrator.

pub mod group;
pub mod run;

// Re-export for convenience
pub use group::{ActivePool, GroupRepository, InMemoryGroupRepository, PgGroupRepository};
pub use run as run_repository;
pub use run::{InMemoryRunRepository, PgRunRepository, RunRepository};
