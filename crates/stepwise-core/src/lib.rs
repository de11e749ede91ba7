//! Workflow engine logic and port definitions for Stepwise.
//!
//! This crate defines the ports (state store, LLM generation, action
//! handlers) that the infrastructure layer implements, plus the parser,
//! validator, scheduler and engine facade built on top of them. It depends
//! only on `stepwise-types` -- never on `stepwise-infra` or any database/IO
//! crate.

pub mod action;
pub mod engine;
pub mod llm;
pub mod repository;
pub mod workflow;
