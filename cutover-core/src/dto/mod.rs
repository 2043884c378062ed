//! Data Transfer Objects for control-plane communication
//!
//! This module contains DTOs exchanged between the orchestrator's HTTP API
//! and its clients (CLI, automation). DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod deployment;
pub mod environment;
pub mod run;
