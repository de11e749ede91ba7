//! Stepwise CLI entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, initializes tracing, the database and the engine,
//! then dispatches to the command handler. The process exit code is the
//! command's result code.

mod cli;
mod state;

use clap::Parser;
use stepwise_core::engine::{EngineError, ResultCode};
use stepwise_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands, collect_vars, execution, output};
use state::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let options = TracingOptions {
        default_filter: TracingOptions::verbosity(cli.verbose, cli.quiet),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        enable_otel: false,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let json = cli.json;
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            let code = err
                .downcast_ref::<EngineError>()
                .map(EngineError::code)
                .unwrap_or(ResultCode::Internal);
            output::print_error(&format!("{err:#}"), code, json);
            code
        }
    };

    shutdown_tracing();
    std::process::exit(code.exit_code());
}

async fn dispatch(cli: Cli) -> anyhow::Result<ResultCode> {
    let state = AppState::init(cli.data_dir).await?;
    let json = cli.json;
    let quiet = cli.quiet;

    let result = match cli.command {
        Commands::Run { file, vars, id } => {
            execution::run_workflow(&state, &file, collect_vars(vars), id, json, quiet).await
        }
        Commands::Resume { id, vars } => {
            execution::resume_execution(&state, &id, collect_vars(vars), json, quiet).await
        }
        Commands::Status { id } => execution::show_status(&state, &id, json).await,
        Commands::Cancel { id } => execution::cancel_execution(&state, &id, json, quiet).await,
        Commands::List {
            workflow,
            status,
            limit,
        } => execution::list_executions(&state, workflow, status, limit, json).await,
        Commands::Validate { file } => execution::validate_workflow(&state, &file, json).await,
        Commands::Delete { id } => execution::delete_execution(&state, &id, json, quiet).await,
    };

    state.shutdown().await;
    result
}
