//! Execution commands: run, resume, status, cancel, list, validate, delete.
//!
//! Each handler returns the [`ResultCode`] the process should exit with.
//! Engine errors propagate through `anyhow` and are mapped to a code in `main`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use stepwise_core::engine::{EngineError, ExecutionResult, ResultCode};
use stepwise_core::workflow::dag::execution_waves;
use stepwise_core::workflow::definition::WorkflowError;
use stepwise_types::execution::{ExecutionFilter, ExecutionStatus, StatusSnapshot};
use uuid::Uuid;

use super::output::{format_duration_ms, print_error, print_json, styled_status};
use crate::state::AppState;

async fn read_definition(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read workflow file {}", file.display()))
}

// ---------------------------------------------------------------------------
// Run / resume
// ---------------------------------------------------------------------------

/// Execute a workflow file.
pub async fn run_workflow(
    state: &AppState,
    file: &Path,
    vars: BTreeMap<String, Value>,
    id: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ResultCode> {
    let text = read_definition(file).await?;
    // The id is chosen up front so Ctrl-C can address the run.
    let execution_id = id.unwrap_or_else(|| Uuid::now_v7().to_string());

    if !json && !quiet {
        println!(
            "  {} Running {} as {}",
            style("*").cyan().bold(),
            style(file.display()).cyan(),
            style(&execution_id).dim()
        );
    }

    let result = until_interrupted(
        state,
        &execution_id,
        state.engine.execute_with_id(&text, vars, execution_id.clone()),
    )
    .await?;

    display_result(&result, json, quiet)?;
    Ok(result.code())
}

/// Resume a persisted execution.
pub async fn resume_execution(
    state: &AppState,
    execution_id: &str,
    vars: BTreeMap<String, Value>,
    json: bool,
    quiet: bool,
) -> Result<ResultCode> {
    if !json && !quiet {
        println!(
            "  {} Resuming {}",
            style("*").cyan().bold(),
            style(execution_id).cyan()
        );
    }

    let result = until_interrupted(
        state,
        execution_id,
        state.engine.resume(execution_id, vars),
    )
    .await?;

    display_result(&result, json, quiet)?;
    Ok(result.code())
}

/// Drive a run to completion, cancelling it cooperatively on Ctrl-C.
///
/// After the first interrupt the cancel request is repeated until the run has
/// registered itself, then the run is awaited so the `cancelled` status is
/// durable before the process exits.
async fn until_interrupted<F>(
    state: &AppState,
    execution_id: &str,
    run: F,
) -> Result<ExecutionResult, EngineError>
where
    F: Future<Output = Result<ExecutionResult, EngineError>>,
{
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!(
                "  {} Interrupted, cancelling {}",
                style("!").yellow().bold(),
                execution_id
            );
        }
    }

    let executor = state.engine.executor();
    let mut requested = executor.request_cancel(execution_id);
    let mut retry = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            result = &mut run => return result,
            _ = retry.tick(), if !requested => {
                requested = executor.request_cancel(execution_id);
            }
        }
    }
}

fn display_result(result: &ExecutionResult, json: bool, quiet: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    if quiet {
        if let Some(ref err) = result.error {
            eprintln!("{err}");
        }
        return Ok(());
    }

    let marker = match result.status {
        ExecutionStatus::Completed => style("*").green().bold(),
        ExecutionStatus::Paused => style("*").yellow().bold(),
        _ => style("x").red().bold(),
    };
    println!();
    println!(
        "  {} Workflow '{}' {}",
        marker,
        style(&result.workflow_name).cyan(),
        styled_status(result.status)
    );
    println!("  Execution: {}", style(&result.execution_id).dim());

    if !result.step_results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Step", "Result", "Attempts", "Duration", "Error"]);

        for (step_id, step) in &result.step_results {
            let outcome = if step.success {
                Cell::new("ok").fg(Color::Green)
            } else {
                Cell::new("failed").fg(Color::Red)
            };
            let error = step
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.category, e.message))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(step_id),
                outcome,
                Cell::new(step.attempts),
                Cell::new(format_duration_ms(step.duration_ms)),
                Cell::new(error),
            ]);
        }
        println!();
        println!("{table}");
    }

    if let Some(ref err) = result.error {
        println!();
        println!("  Error: {}", style(err).red());
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn show_status(state: &AppState, execution_id: &str, json: bool) -> Result<ResultCode> {
    let snapshot = state.engine.status(execution_id).await?;
    if json {
        print_json(&snapshot)?;
    } else {
        display_snapshot(&snapshot);
    }
    Ok(ResultCode::Success)
}

fn display_snapshot(snapshot: &StatusSnapshot) {
    let total =
        snapshot.completed_steps.len() + snapshot.failed_steps.len() + snapshot.pending_steps.len();

    println!();
    println!(
        "  {} {}",
        style("Execution:").bold(),
        style(&snapshot.execution_id).cyan()
    );
    println!("  Workflow: {}", style(&snapshot.workflow_name).cyan());
    let live = if snapshot.active { " (active)" } else { "" };
    println!("  Status: {}{live}", styled_status(snapshot.status));
    println!(
        "  Progress: {}/{} steps completed",
        snapshot.completed_steps.len(),
        total
    );
    if let Some(ref step) = snapshot.current_step {
        println!("  Current step: {step}");
    }
    if !snapshot.failed_steps.is_empty() {
        println!("  Failed: {}", style(snapshot.failed_steps.join(", ")).red());
    }
    if !snapshot.pending_steps.is_empty() {
        println!("  Pending: {}", snapshot.pending_steps.join(", "));
    }
    println!("  Created: {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", snapshot.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ref err) = snapshot.error {
        println!("  Error: {}", style(err).red());
    }
    if snapshot.status.is_resumable() && !snapshot.active {
        println!();
        println!(
            "  Continue with: {}",
            style(format!("stepwise resume {}", snapshot.execution_id)).dim()
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel_execution(
    state: &AppState,
    execution_id: &str,
    json: bool,
    quiet: bool,
) -> Result<ResultCode> {
    let cancelled = state.engine.cancel(execution_id).await?;

    if json {
        print_json(&serde_json::json!({
            "execution_id": execution_id,
            "cancelled": cancelled,
        }))?;
    } else if !quiet {
        if cancelled {
            println!(
                "  {} Cancelled execution {}",
                style("*").green().bold(),
                style(execution_id).cyan()
            );
        } else {
            println!(
                "  Execution {} has already finished, nothing to cancel.",
                style(execution_id).cyan()
            );
        }
    }

    Ok(if cancelled {
        ResultCode::Success
    } else {
        ResultCode::Conflict
    })
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_executions(
    state: &AppState,
    workflow: Option<String>,
    status: Option<ExecutionStatus>,
    limit: usize,
    json: bool,
) -> Result<ResultCode> {
    let filter = ExecutionFilter {
        workflow_name: workflow,
        status,
        limit,
    };
    let executions = state.engine.list(&filter).await?;

    if json {
        print_json(&executions)?;
        return Ok(ResultCode::Success);
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!();
        println!(
            "  Start one with: {}",
            style("stepwise run <workflow.yaml>").dim()
        );
        println!();
        return Ok(ResultCode::Success);
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Execution", "Workflow", "Status", "Progress", "Created", "Updated"]);

    for summary in &executions {
        let status_color = match summary.status {
            ExecutionStatus::Completed => Color::Green,
            ExecutionStatus::Running => Color::Cyan,
            ExecutionStatus::Paused => Color::Yellow,
            ExecutionStatus::Failed => Color::Red,
            ExecutionStatus::Cancelled => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(&summary.execution_id),
            Cell::new(&summary.workflow_name),
            Cell::new(summary.status).fg(status_color),
            Cell::new(format!("{}/{}", summary.completed_steps, summary.total_steps)),
            Cell::new(summary.created_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(summary.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(ResultCode::Success)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Check a definition and print its dependency waves.
pub async fn validate_workflow(state: &AppState, file: &Path, json: bool) -> Result<ResultCode> {
    let text = read_definition(file).await?;

    let workflow = match state.engine.validate(&text) {
        Ok(workflow) => workflow,
        Err(EngineError::Workflow(WorkflowError::Validation(errors))) => {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            if json {
                print_json(&serde_json::json!({
                    "valid": false,
                    "errors": messages,
                }))?;
            } else {
                println!();
                println!(
                    "  {} {} has {} problem(s):",
                    style("x").red().bold(),
                    style(file.display()).cyan(),
                    messages.len()
                );
                for message in &messages {
                    println!("    - {message}");
                }
                println!();
            }
            return Ok(ResultCode::ValidationFailure);
        }
        Err(err) => return Err(err.into()),
    };

    let waves = execution_waves(&workflow.steps)?;

    if json {
        let plan: Vec<Vec<&str>> = waves
            .iter()
            .map(|wave| wave.iter().map(|s| s.id.as_str()).collect())
            .collect();
        print_json(&serde_json::json!({
            "valid": true,
            "name": workflow.name,
            "version": workflow.version,
            "variables": workflow.variables,
            "steps": workflow.steps.len(),
            "waves": plan,
        }))?;
        return Ok(ResultCode::Success);
    }

    println!();
    println!(
        "  {} Workflow '{}' v{} is valid",
        style("*").green().bold(),
        style(&workflow.name).cyan(),
        workflow.version
    );
    if let Some(ref description) = workflow.description {
        println!("  {}", style(description).dim());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Wave", "Step", "Type", "Depends on"]);
    for (n, wave) in waves.iter().enumerate() {
        for step in wave {
            table.add_row(vec![
                Cell::new(n + 1),
                Cell::new(&step.id),
                Cell::new(&step.step_type),
                Cell::new(step.depends_on.join(", ")),
            ]);
        }
    }
    println!("{table}");
    println!();

    Ok(ResultCode::Success)
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

pub async fn delete_execution(
    state: &AppState,
    execution_id: &str,
    json: bool,
    quiet: bool,
) -> Result<ResultCode> {
    let deleted = state.engine.delete(execution_id).await?;

    if json {
        print_json(&serde_json::json!({
            "execution_id": execution_id,
            "deleted": deleted,
        }))?;
    } else if !quiet {
        if deleted {
            println!(
                "  {} Deleted execution {}",
                style("*").green().bold(),
                style(execution_id).cyan()
            );
        } else {
            print_error(
                &format!("execution '{execution_id}' not found"),
                ResultCode::NotFound,
                false,
            );
        }
    }

    Ok(if deleted {
        ResultCode::Success
    } else {
        ResultCode::NotFound
    })
}
