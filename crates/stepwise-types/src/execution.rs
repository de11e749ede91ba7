//! Execution tracking types.
//!
//! [`WorkflowState`] is the persisted record of one execution. It is owned
//! and mutated by exactly one executor run at a time; state stores only
//! serialize and deserialize it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution has stopped for good or is waiting for a resume.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether `resume` may pick this execution up again.
    ///
    /// `Running` is included for executions orphaned by a crashed process;
    /// the executor only takes one over once its ownership lease has lapsed.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Running | ExecutionStatus::Paused | ExecutionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" | "canceled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors recorded in state
// ---------------------------------------------------------------------------

/// Classification of a step or execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The LLM port failed.
    Provider,
    /// An action handler failed.
    Action,
    /// The step is misconfigured (unknown action, bad config block).
    Configuration,
    /// A template could not be rendered.
    Render,
    /// The step exceeded its timeout.
    Timeout,
    /// The step did not produce a declared output.
    Output,
    /// The step task panicked or was aborted.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Provider => "provider",
            ErrorCategory::Action => "action",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Render => "render",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Output => "output",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure details attached to a failed [`StepResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

/// Execution-level error recorded on a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Step that caused the failure, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "step '{step}' failed ({}): {}", self.category, self.message),
            None => write!(f, "{}: {}", self.category, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Outcome of one step. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    /// Declared output name -> produced value.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Wall-clock time across all attempts, including backoff.
    pub duration_ms: u64,
    /// Total attempts made (first try plus retries).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    /// Number of retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// The mutable, persisted record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// A step currently in flight, for crash diagnostics.
    #[serde(default)]
    pub current_step: Option<String>,
    /// Defaults, overridden by caller inputs, augmented by `<step>.<output>` bindings.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Every finished step, successful or not.
    #[serde(default)]
    pub step_results: BTreeMap<String, StepResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Definition snapshot so the execution can be resumed by another process.
    pub workflow: Workflow,
}

impl WorkflowState {
    /// Create a fresh `running` state.
    ///
    /// Variables are the workflow defaults overridden by `inputs`.
    pub fn new(
        execution_id: impl Into<String>,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let mut variables = workflow.variables.clone();
        variables.extend(inputs);
        Self {
            execution_id: execution_id.into(),
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Running,
            current_step: None,
            variables,
            step_results: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            error: None,
            workflow: workflow.clone(),
        }
    }

    /// Whether `step_id` has a recorded successful result.
    pub fn has_succeeded(&self, step_id: &str) -> bool {
        self.step_results
            .get(step_id)
            .is_some_and(|r| r.success)
    }

    /// Ids of steps with a successful result, in declaration order.
    pub fn completed_steps(&self) -> Vec<String> {
        self.workflow
            .step_ids()
            .filter(|id| self.has_succeeded(id))
            .map(str::to_string)
            .collect()
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.execution_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            completed_steps: self.step_results.values().filter(|r| r.success).count(),
            total_steps: self.workflow.steps.len(),
            error: self.error.as_ref().map(ToString::to_string),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Point-in-time status view. `active` says whether a run is in flight in
    /// this process.
    pub fn snapshot(&self, active: bool) -> StatusSnapshot {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut pending = Vec::new();
        for id in self.workflow.step_ids() {
            match self.step_results.get(id) {
                Some(r) if r.success => completed.push(id.to_string()),
                Some(_) => failed.push(id.to_string()),
                None => pending.push(id.to_string()),
            }
        }
        StatusSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            active,
            current_step: self.current_step.clone(),
            completed_steps: completed,
            failed_steps: failed,
            pending_steps: pending,
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Listing row for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing executions. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            workflow_name: None,
            status: None,
            limit: default_limit(),
        }
    }
}

impl ExecutionFilter {
    pub fn matches(&self, summary: &ExecutionSummary) -> bool {
        self.workflow_name
            .as_deref()
            .is_none_or(|w| w == summary.workflow_name)
            && self.status.is_none_or(|s| s == summary.status)
    }
}

// ---------------------------------------------------------------------------
// Ownership leases
// ---------------------------------------------------------------------------

/// A stop request recorded against a live lease by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Cancel,
    Pause,
}

impl StopKind {
    /// Status the owning run persists when it honours the request.
    pub fn target_status(&self) -> ExecutionStatus {
        match self {
            StopKind::Cancel => ExecutionStatus::Cancelled,
            StopKind::Pause => ExecutionStatus::Paused,
        }
    }

    /// Merge two pending requests; cancel wins over pause.
    pub fn merge(current: Option<StopKind>, incoming: StopKind) -> StopKind {
        match current {
            Some(StopKind::Cancel) => StopKind::Cancel,
            _ => incoming,
        }
    }
}

/// What a lease holder learns when it renews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRenewal {
    /// The caller still owns the lease. `false` means another owner took
    /// over after the lease expired.
    pub held: bool,
    /// Stop requested by another process, if any.
    pub stop: Option<StopKind>,
}

/// Status view returned by the engine facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// A run for this execution is in flight in this process.
    pub active: bool,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub pending_steps: Vec<String>,
    pub error: Option<ExecutionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepDefinition, StepType};

    fn workflow() -> Workflow {
        let step = |id: &str| StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            step_type: StepType::Action,
            config: Default::default(),
            depends_on: vec![],
            outputs: vec![],
            timeout_secs: None,
            retry: None,
        };
        Workflow {
            name: "wf".to_string(),
            version: "1.0".to_string(),
            description: None,
            variables: BTreeMap::from([
                ("topic".to_string(), Value::from("rust")),
                ("depth".to_string(), Value::from(1)),
            ]),
            steps: vec![step("a"), step("b"), step("c")],
        }
    }

    fn result(id: &str, success: bool) -> StepResult {
        let now = Utc::now();
        StepResult {
            step_id: id.to_string(),
            success,
            outputs: BTreeMap::new(),
            duration_ms: 5,
            attempts: 3,
            error: None,
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn test_new_state_merges_inputs_over_defaults() {
        let state = WorkflowState::new(
            "exec-1",
            &workflow(),
            BTreeMap::from([("topic".to_string(), Value::from("AI"))]),
        );
        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.variables["topic"], Value::from("AI"));
        assert_eq!(state.variables["depth"], Value::from(1));
        assert!(state.step_results.is_empty());
    }

    #[test]
    fn test_snapshot_partitions_steps() {
        let mut state = WorkflowState::new("exec-1", &workflow(), BTreeMap::new());
        state.step_results.insert("a".into(), result("a", true));
        state.step_results.insert("b".into(), result("b", false));
        let snap = state.snapshot(false);
        assert_eq!(snap.completed_steps, vec!["a"]);
        assert_eq!(snap.failed_steps, vec!["b"]);
        assert_eq!(snap.pending_steps, vec!["c"]);
        assert_eq!(state.summary().completed_steps, 1);
        assert_eq!(state.summary().total_steps, 3);
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("exploded".parse::<ExecutionStatus>().is_err());
        assert!(ExecutionStatus::Failed.is_resumable());
        assert!(!ExecutionStatus::Completed.is_resumable());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }

    #[test]
    fn test_retries_counts_attempts_after_first() {
        assert_eq!(result("a", false).retries(), 2);
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError {
            step_id: Some("fetch".into()),
            category: ErrorCategory::Timeout,
            message: "timed out after 5s".into(),
        };
        assert_eq!(err.to_string(), "step 'fetch' failed (timeout): timed out after 5s");
    }

    #[test]
    fn test_filter_matches() {
        let state = WorkflowState::new("exec-1", &workflow(), BTreeMap::new());
        let summary = state.summary();
        assert!(ExecutionFilter::default().matches(&summary));
        let by_name = ExecutionFilter {
            workflow_name: Some("other".into()),
            ..Default::default()
        };
        assert!(!by_name.matches(&summary));
        let by_status = ExecutionFilter {
            status: Some(ExecutionStatus::Running),
            ..Default::default()
        };
        assert!(by_status.matches(&summary));
    }

    #[test]
    fn test_state_json_roundtrip() {
        let mut state = WorkflowState::new("exec-1", &workflow(), BTreeMap::new());
        state.step_results.insert("a".into(), result("a", true));
        let json = serde_json::to_string(&state).unwrap();
        let parsed: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_cancel_overrides_pending_pause() {
        assert_eq!(StopKind::merge(None, StopKind::Pause), StopKind::Pause);
        assert_eq!(StopKind::merge(Some(StopKind::Pause), StopKind::Cancel), StopKind::Cancel);
        assert_eq!(StopKind::merge(Some(StopKind::Cancel), StopKind::Pause), StopKind::Cancel);
        assert_eq!(StopKind::Pause.target_status(), ExecutionStatus::Paused);
    }
}
