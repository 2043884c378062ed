//! Core domain types
//!
//! This module contains the core domain structures used across Cutover crates.
//! These types represent the fundamental business entities and are shared between
//! the orchestrator (which drives and persists them) and its clients (which display them).

pub mod artifact;
pub mod deployment;
pub mod environment;
pub mod pool;
pub mod run;
