//! Cutover Core
//!
//! Core types and abstractions for the Cutover blue/green delivery system.
//!
//! This crate contains:
//! - Domain types: Core business entities (EnvironmentConfig, PipelineRun, DeploymentGroup, etc.)
//! - DTOs: Data transfer objects for communication between the control plane and its clients

pub mod domain;
pub mod dto;
