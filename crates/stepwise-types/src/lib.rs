//! Shared domain types for Stepwise.
//!
//! This crate contains the data model used across the engine: workflow
//! definitions, persisted execution state, step results, engine configuration
//! and the error types shared between layers.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod workflow;
