//! LLM port adapters.

pub mod openai_compat;
