//! LLM invocation port.
//!
//! The engine asks a model for text through [`port::LlmPort`]; concrete
//! adapters live in stepwise-infra. [`box_port::BoxLlmPort`] erases the
//! adapter type for the executor.

pub mod box_port;
pub mod port;
