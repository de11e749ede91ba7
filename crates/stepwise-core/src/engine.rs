//! Engine facade: the single entry point over parser, validator, executor
//! and state store.
//!
//! Every operation maps onto a [`ResultCode`] so front ends can turn outcomes
//! into process exit codes without inspecting error variants themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use stepwise_types::config::EngineConfig;
use stepwise_types::error::StoreError;
use stepwise_types::execution::{
    ExecutionError, ExecutionFilter, ExecutionStatus, ExecutionSummary, StatusSnapshot,
    StepResult, WorkflowState,
};
use stepwise_types::workflow::Workflow;

use crate::action::ActionRegistry;
use crate::llm::box_port::BoxLlmPort;
use crate::repository::StateStore;
use crate::workflow::definition::{WorkflowError, load_workflow};
use crate::workflow::executor::{DagExecutor, ExecutorError, WorkflowExecutor};
use crate::workflow::step_runner::StepRunner;

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// Outcome class of a facade call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    ValidationFailure,
    ExecutionFailure,
    NotFound,
    Conflict,
    Internal,
}

impl ResultCode {
    pub fn exit_code(self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Internal => 1,
            ResultCode::ValidationFailure => 2,
            ResultCode::ExecutionFailure => 3,
            ResultCode::NotFound => 4,
            ResultCode::Conflict => 5,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("execution '{0}' not found")]
    NotFound(String),

    #[error("execution '{0}' is running and cannot be deleted")]
    Active(String),
}

impl EngineError {
    pub fn code(&self) -> ResultCode {
        match self {
            EngineError::Workflow(WorkflowError::Io(_)) => ResultCode::Internal,
            EngineError::Workflow(_) => ResultCode::ValidationFailure,
            EngineError::Executor(err) => match err {
                ExecutorError::Workflow(WorkflowError::Io(_)) => ResultCode::Internal,
                ExecutorError::Workflow(_) => ResultCode::ValidationFailure,
                ExecutorError::Conflict(_)
                | ExecutorError::LeaseLost(_)
                | ExecutorError::NotResumable { .. }
                | ExecutorError::WorkflowMismatch { .. } => ResultCode::Conflict,
                ExecutorError::NotFound(_) => ResultCode::NotFound,
                ExecutorError::Checkpoint(_) => ResultCode::Internal,
            },
            EngineError::Store(_) => ResultCode::Internal,
            EngineError::NotFound(_) => ResultCode::NotFound,
            EngineError::Active(_) => ResultCode::Conflict,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Final view of an execution returned by `execute` and `resume`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub variables: BTreeMap<String, Value>,
    pub step_results: BTreeMap<String, StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// `completed` and `paused` are successes; `failed` and `cancelled` are not.
    pub fn code(&self) -> ResultCode {
        match self.status {
            ExecutionStatus::Completed | ExecutionStatus::Paused => ResultCode::Success,
            ExecutionStatus::Failed | ExecutionStatus::Cancelled => ResultCode::ExecutionFailure,
            ExecutionStatus::Running => ResultCode::Internal,
        }
    }
}

impl From<WorkflowState> for ExecutionResult {
    fn from(state: WorkflowState) -> Self {
        Self {
            execution_id: state.execution_id,
            workflow_name: state.workflow_name,
            status: state.status,
            variables: state.variables,
            step_results: state.step_results,
            error: state.error,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Workflow engine over a state store backend.
///
/// Cheap to clone; clones share the executor and its active-run registry, so
/// one clone can cancel a run another clone is driving.
pub struct Engine<S: StateStore> {
    executor: Arc<DagExecutor<S>>,
}

impl<S: StateStore> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<S: StateStore + 'static> Engine<S> {
    pub fn new(
        store: Arc<S>,
        actions: ActionRegistry,
        llm: Option<BoxLlmPort>,
        config: EngineConfig,
    ) -> Self {
        let runner = StepRunner::new(
            Arc::new(actions),
            llm.map(Arc::new),
            config.default_model.clone(),
        );
        Self {
            executor: Arc::new(DagExecutor::new(store, runner, config)),
        }
    }

    pub fn executor(&self) -> &DagExecutor<S> {
        &self.executor
    }

    /// Parse and validate a definition without executing it.
    pub fn validate(&self, workflow_text: &str) -> Result<Workflow, EngineError> {
        Ok(load_workflow(workflow_text)?)
    }

    /// Run a workflow document under a fresh execution id.
    pub async fn execute(
        &self,
        workflow_text: &str,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionResult, EngineError> {
        let workflow = load_workflow(workflow_text)?;
        let state = self.executor.execute(&workflow, variables, None).await?;
        Ok(state.into())
    }

    /// Run a workflow document under a caller-chosen id.
    ///
    /// When the id already names a persisted execution it is resumed.
    pub async fn execute_with_id(
        &self,
        workflow_text: &str,
        variables: BTreeMap<String, Value>,
        execution_id: impl Into<String>,
    ) -> Result<ExecutionResult, EngineError> {
        let workflow = load_workflow(workflow_text)?;
        let state = self
            .executor
            .execute(&workflow, variables, Some(execution_id.into()))
            .await?;
        Ok(state.into())
    }

    pub async fn resume(
        &self,
        execution_id: &str,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionResult, EngineError> {
        let state = self.executor.resume(execution_id, variables).await?;
        Ok(state.into())
    }

    pub async fn status(&self, execution_id: &str) -> Result<StatusSnapshot, EngineError> {
        let state = self
            .executor
            .store()
            .load(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        Ok(state.snapshot(self.executor.is_active(execution_id)))
    }

    pub async fn cancel(&self, execution_id: &str) -> Result<bool, EngineError> {
        Ok(self.executor.cancel(execution_id).await?)
    }

    pub async fn pause(&self, execution_id: &str) -> Result<bool, EngineError> {
        Ok(self.executor.pause(execution_id).await?)
    }

    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSummary>, EngineError> {
        Ok(self.executor.store().list(filter).await?)
    }

    /// Remove a persisted execution. Runs holding the id here or in another
    /// process are refused.
    pub async fn delete(&self, execution_id: &str) -> Result<bool, EngineError> {
        let deleted = match self.executor.delete(execution_id).await {
            Err(ExecutorError::Conflict(_)) => {
                return Err(EngineError::Active(execution_id.to_string()));
            }
            other => other?,
        };
        if deleted {
            tracing::info!(execution_id, "Deleted execution");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::action::delay::DelayAction;
    use crate::repository::InMemoryStateStore;

    fn engine() -> Engine<InMemoryStateStore> {
        let mut actions = ActionRegistry::new();
        actions.register("delay", DelayAction);
        Engine::new(
            Arc::new(InMemoryStateStore::new()),
            actions,
            None,
            EngineConfig::default(),
        )
    }

    const NAP: &str = r#"
name: nap
steps:
  - id: rest
    type: action
    config:
      action: delay
      params: { ms: 1 }
"#;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ResultCode::Success.exit_code(), 0);
        assert_eq!(ResultCode::Internal.exit_code(), 1);
        assert_eq!(ResultCode::ValidationFailure.exit_code(), 2);
        assert_eq!(ResultCode::ExecutionFailure.exit_code(), 3);
        assert_eq!(ResultCode::NotFound.exit_code(), 4);
        assert_eq!(ResultCode::Conflict.exit_code(), 5);
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let engine = engine();
        let result = engine.execute(NAP, BTreeMap::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.code(), ResultCode::Success);
        assert_eq!(result.variables["rest.output"], json!({"slept_ms": 1}));

        let status = engine.status(&result.execution_id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert!(!status.active);
        assert_eq!(status.completed_steps, vec!["rest".to_string()]);

        let listed = engine.list(&ExecutionFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_name, "nap");

        assert!(engine.delete(&result.execution_id).await.unwrap());
        assert!(!engine.delete(&result.execution_id).await.unwrap());
        let err = engine.status(&result.execution_id).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_document_persists_nothing() {
        let engine = engine();
        let err = engine.execute("name: x\nsteps: [", BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.code(), ResultCode::ValidationFailure);

        let err = engine
            .execute(
                "name: x\nsteps:\n  - { id: a, type: teleport }\n",
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::ValidationFailure);
        assert!(engine.list(&ExecutionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let engine = engine();
        assert_eq!(
            engine.resume("nope", BTreeMap::new()).await.unwrap_err().code(),
            ResultCode::NotFound
        );
        assert_eq!(engine.cancel("nope").await.unwrap_err().code(), ResultCode::NotFound);
        assert_eq!(engine.pause("nope").await.unwrap_err().code(), ResultCode::NotFound);
    }

    #[tokio::test]
    async fn test_validate_returns_workflow() {
        let workflow = engine().validate(NAP).unwrap();
        assert_eq!(workflow.name, "nap");
        assert_eq!(workflow.steps.len(), 1);
    }
}
