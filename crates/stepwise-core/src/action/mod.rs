//! Action registry and the built-in actions that need no I/O crates.
//!
//! - [`registry`]: `ActionHandler` trait, object-safe wrapper, name lookup
//! - [`delay`]: the `delay` action

pub mod delay;
pub mod registry;

pub use registry::{ActionHandler, ActionRegistry};
