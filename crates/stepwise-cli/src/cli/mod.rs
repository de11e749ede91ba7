//! CLI command definitions for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are verbs acting on
//! a workflow file or an execution id (e.g., `stepwise run flow.yaml`,
//! `stepwise status <id>`).

pub mod execution;
pub mod output;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use stepwise_types::execution::ExecutionStatus;

/// Run and inspect durable multi-step workflows.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Data directory holding `stepwise.db` and `config.toml`.
    #[arg(long, global = true, env = "STEPWISE_HOME")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition file.
    Run {
        /// Path to the YAML or JSON workflow definition.
        file: PathBuf,

        /// Input variable as key=value (value parsed as JSON when possible).
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Execution id to use. Resumes the execution if it already exists.
        #[arg(long)]
        id: Option<String>,
    },

    /// Continue a paused, failed or interrupted execution.
    Resume {
        /// Execution id.
        id: String,

        /// Input variable as key=value, merged over the persisted variables.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },

    /// Show the status of an execution.
    Status {
        /// Execution id.
        id: String,
    },

    /// Cancel a paused or interrupted execution.
    Cancel {
        /// Execution id.
        id: String,
    },

    /// List persisted executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions of this workflow.
        #[arg(long)]
        workflow: Option<String>,

        /// Only executions in this status.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Maximum number of rows.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Check a workflow definition and print its execution plan.
    Validate {
        /// Path to the YAML or JSON workflow definition.
        file: PathBuf,
    },

    /// Delete a persisted execution.
    #[command(alias = "rm")]
    Delete {
        /// Execution id.
        id: String,
    },
}

/// Parse a `key=value` pair. The value is JSON when it parses as JSON,
/// otherwise the raw string.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Collect parsed `--var` pairs; later pairs win.
pub fn collect_vars(vars: Vec<(String, Value)>) -> BTreeMap<String, Value> {
    vars.into_iter().collect()
}
