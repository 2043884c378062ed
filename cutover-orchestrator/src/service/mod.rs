//! Service Module
//!
//! Pipeline stages, the deployment controller and their collaborators.

pub mod artifact;
pub mod build;
pub mod controller;
pub mod fleet;
pub mod health;
pub mod pipeline;
pub mod runtime;
pub mod source;
pub mod traffic;
pub mod watcher;

#[cfg(test)]
pub mod testing;

// Re-export for convenience
pub use controller::{ControllerHandle, DeploymentController};
pub use fleet::Fleet;
pub use pipeline::PipelineOrchestrator;
pub use watcher::SourceWatcher;
