//! State store trait definitions (ports) and the in-memory backend.
//!
//! The infrastructure layer (stepwise-infra) provides the durable SQLite
//! implementation. The executor never depends on a specific backend.

pub mod memory;
pub mod state;

pub use memory::InMemoryStateStore;
pub use state::StateStore;
