//! Infrastructure layer for Stepwise.
//!
//! Implements the ports defined in `stepwise-core`: the SQLite state store,
//! the I/O-bound built-in actions (`http`, `file_write`), the
//! OpenAI-compatible LLM generator, and the config file loader.

pub mod actions;
pub mod config;
pub mod llm;
pub mod sqlite;
