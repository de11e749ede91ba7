//! Workflow engine core: definition parsing, DAG scheduling, and durable checkpointing.
//!
//! - `definition` -- YAML parsing and structural validation
//! - `dag` -- dependency graph, cycle paths, topological waves
//! - `template` -- `{{name}}` placeholder rendering against bound variables
//! - `outputs` -- binding step products to declared outputs
//! - `retry` -- retry schedule and decisions
//! - `step_runner` -- runs one step (LLM call or action) with timeout and retry
//! - `checkpoint` -- persists execution state through the state store
//! - `executor` -- ready-set parallel DAG executor

pub mod checkpoint;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod outputs;
pub mod retry;
pub mod step_runner;
pub mod template;
