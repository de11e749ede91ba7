//! SQLite storage: connection pool and the execution state store.

pub mod pool;
pub mod state_store;
