//! Workflow executor: ready-set DAG scheduling with per-step checkpoints.
//!
//! The `DagExecutor` dispatches every step whose dependencies have succeeded,
//! up to `max_concurrency` at once, as tasks on a `tokio::JoinSet`. The
//! dispatch loop is the only writer of the `WorkflowState`: step tasks get an
//! owned snapshot of the variables and hand back a `StepResult`, which the
//! loop records and checkpoints before looking for newly ready steps.
//!
//! # Execution flow
//!
//! 1. Claim the execution id: locally, then through a lease in the store so
//!    a second process sharing the store sees a conflict too.
//! 2. Create a fresh state, or load the persisted one when resuming.
//! 3. Dispatch ready steps; record each result as it arrives; checkpoint.
//! 4. A step that fails for good halts dispatching; in-flight steps finish.
//! 5. Cancel/pause requests halt dispatching the same way. Requests made by
//!    other processes arrive through the lease on every heartbeat.
//! 6. Persist the terminal status, then release the lease and the id.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use stepwise_types::config::EngineConfig;
use stepwise_types::execution::{
    ErrorCategory, ExecutionError, ExecutionStatus, StepFailure, StepResult, StopKind,
    WorkflowState,
};
use stepwise_types::workflow::{StepDefinition, Workflow};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::StateStore;

use super::checkpoint::{CheckpointError, CheckpointManager, CheckpointReason};
use super::definition::{WorkflowError, validate_workflow};
use super::outputs::merge_outputs;
use super::retry::RetrySchedule;
use super::step_runner::{StepRunner, StepSettings};

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
pub trait WorkflowExecutor: Send + Sync {
    /// Execute a workflow. When `execution_id` names a persisted execution,
    /// that execution is resumed instead.
    fn execute(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
        execution_id: Option<String>,
    ) -> impl std::future::Future<Output = Result<WorkflowState, ExecutorError>> + Send;

    /// Continue a paused, failed or orphaned execution from its last checkpoint.
    fn resume(
        &self,
        execution_id: &str,
        inputs: BTreeMap<String, Value>,
    ) -> impl std::future::Future<Output = Result<WorkflowState, ExecutorError>> + Send;

    /// Cancel an execution. Returns `true` once the `cancelled` status is
    /// durable, `false` when the execution ended some other way.
    fn cancel(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, ExecutorError>> + Send;

    /// Pause an execution. Returns `true` once the `paused` status is durable.
    fn pause(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that stop the executor from running (or finishing) an execution.
///
/// Step failures are not errors here: they end up in the returned state.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("execution '{0}' is already running")]
    Conflict(String),

    #[error("execution '{0}' was taken over by another process")]
    LeaseLost(String),

    #[error("execution '{0}' not found")]
    NotFound(String),

    #[error("execution '{execution_id}' is {status} and cannot be resumed")]
    NotResumable {
        execution_id: String,
        status: ExecutionStatus,
    },

    #[error("execution '{execution_id}' belongs to workflow '{expected}', not '{found}'")]
    WorkflowMismatch {
        execution_id: String,
        expected: String,
        found: String,
    },
}

impl From<stepwise_types::error::StoreError> for ExecutorError {
    fn from(err: stepwise_types::error::StoreError) -> Self {
        ExecutorError::Checkpoint(CheckpointError::Store(err))
    }
}

// ---------------------------------------------------------------------------
// Active execution bookkeeping
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ActiveRun {
    cancel: CancellationToken,
    pause: CancellationToken,
    finished: watch::Receiver<bool>,
}

impl ActiveRun {
    fn token(&self, kind: StopKind) -> &CancellationToken {
        match kind {
            StopKind::Cancel => &self.cancel,
            StopKind::Pause => &self.pause,
        }
    }
}

/// Holds an execution id for the lifetime of one run.
///
/// Dropping it releases the id and wakes everyone waiting for the run to end.
/// The store lease is released separately, before the drop.
struct ActiveGuard<'a> {
    active: &'a DashMap<String, ActiveRun>,
    execution_id: String,
    finished: watch::Sender<bool>,
    run: ActiveRun,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.execution_id);
        self.finished.send_replace(true);
    }
}

/// Why dispatching stopped before the graph was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    Cancelled,
    Paused,
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Ready-set DAG executor with durable per-step checkpointing.
///
/// Generic over `S: StateStore` for storage flexibility.
pub struct DagExecutor<S: StateStore> {
    checkpoint: CheckpointManager<S>,
    runner: StepRunner,
    config: EngineConfig,
    /// Lease owner id of this executor.
    owner: String,
    /// Executions currently running in this process, keyed by execution id.
    active: DashMap<String, ActiveRun>,
}

impl<S: StateStore + 'static> DagExecutor<S> {
    pub fn new(store: Arc<S>, runner: StepRunner, config: EngineConfig) -> Self {
        Self {
            checkpoint: CheckpointManager::new(store),
            runner,
            config,
            owner: Uuid::now_v7().to_string(),
            active: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.checkpoint.store()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Owner id this executor writes into execution leases.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether a run for `execution_id` is in flight in this process.
    pub fn is_active(&self, execution_id: &str) -> bool {
        self.active.contains_key(execution_id)
    }

    /// Trip the cancellation flag of an active run without waiting.
    ///
    /// Returns `false` when no run for the id is active.
    pub fn request_cancel(&self, execution_id: &str) -> bool {
        match self.active.get(execution_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Trip the pause flag of an active run without waiting.
    pub fn request_pause(&self, execution_id: &str) -> bool {
        match self.active.get(execution_id) {
            Some(run) => {
                run.pause.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete a persisted execution, holding the claim while it happens.
    ///
    /// A run holding the id here or in another process is a conflict.
    pub async fn delete(&self, execution_id: &str) -> Result<bool, ExecutorError> {
        let guard = self.claim(execution_id).await?;
        let deleted = self.store().delete(execution_id).await;
        self.release(execution_id).await;
        drop(guard);
        Ok(deleted?)
    }

    // -----------------------------------------------------------------------
    // Claims and leases
    // -----------------------------------------------------------------------

    fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.config.lease_ttl_ms.max(3))
    }

    /// Interval between lease renewals, a third of the lease lifetime.
    fn heartbeat_period(&self) -> Duration {
        self.lease_ttl() / 3
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lease_ttl())
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn claim_local(&self, execution_id: &str) -> Result<ActiveGuard<'_>, ExecutorError> {
        match self.active.entry(execution_id.to_string()) {
            Entry::Occupied(_) => Err(ExecutorError::Conflict(execution_id.to_string())),
            Entry::Vacant(slot) => {
                let (finished_tx, finished_rx) = watch::channel(false);
                let run = ActiveRun {
                    cancel: CancellationToken::new(),
                    pause: CancellationToken::new(),
                    finished: finished_rx,
                };
                slot.insert(run.clone());
                Ok(ActiveGuard {
                    active: &self.active,
                    execution_id: execution_id.to_string(),
                    finished: finished_tx,
                    run,
                })
            }
        }
    }

    /// Claim the id in this process, then take its lease in the store.
    ///
    /// A live lease held by another owner is a conflict. An expired one is
    /// taken over.
    async fn claim(&self, execution_id: &str) -> Result<ActiveGuard<'_>, ExecutorError> {
        let guard = self.claim_local(execution_id)?;
        let now = Utc::now();
        let acquired = self
            .store()
            .acquire_lease(execution_id, &self.owner, now, self.lease_expiry(now))
            .await?;
        if !acquired {
            tracing::debug!(execution_id, "Execution is leased by another owner");
            return Err(ExecutorError::Conflict(execution_id.to_string()));
        }
        Ok(guard)
    }

    async fn release(&self, execution_id: &str) {
        if let Err(e) = self.store().release_lease(execution_id, &self.owner).await {
            tracing::warn!(execution_id, error = %e, "Failed to release execution lease");
        }
    }

    /// Renew the lease and pick up stop requests left in it by other
    /// processes. Returns `false` once another owner has taken the lease.
    async fn sync_lease(&self, execution_id: &str, run: &ActiveRun) -> bool {
        let expires_at = self.lease_expiry(Utc::now());
        match self
            .store()
            .renew_lease(execution_id, &self.owner, expires_at)
            .await
        {
            Ok(renewal) => {
                if let Some(kind) = renewal.stop {
                    run.token(kind).cancel();
                }
                renewal.held
            }
            Err(e) => {
                tracing::warn!(execution_id, error = %e, "Failed to renew execution lease");
                true
            }
        }
    }

    fn step_settings(&self, step: &StepDefinition) -> StepSettings {
        let timeout_secs = step
            .timeout_secs
            .unwrap_or(self.config.default_step_timeout_secs);
        StepSettings {
            timeout: Duration::from_secs(timeout_secs),
            retry: RetrySchedule::resolve(step.retry.as_ref(), &self.config),
        }
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    async fn execute_inner(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<WorkflowState, ExecutorError> {
        let errors = validate_workflow(workflow);
        if !errors.is_empty() {
            return Err(WorkflowError::Validation(errors).into());
        }

        let execution_id = execution_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        let guard = self.claim(&execution_id).await?;
        let result = self
            .execute_claimed(workflow, inputs, &execution_id, &guard.run)
            .await;
        self.release(&execution_id).await;
        drop(guard);
        result
    }

    async fn execute_claimed(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
        execution_id: &str,
        run: &ActiveRun,
    ) -> Result<WorkflowState, ExecutorError> {
        let (mut state, reason) = match self.checkpoint.restore(execution_id).await? {
            Some(existing) => {
                if existing.workflow_name != workflow.name {
                    return Err(ExecutorError::WorkflowMismatch {
                        execution_id: execution_id.to_string(),
                        expected: existing.workflow_name,
                        found: workflow.name.clone(),
                    });
                }
                let mut state = Self::prepare_resume(existing, inputs)?;
                state.workflow = workflow.clone();
                (state, CheckpointReason::Resumed)
            }
            None => (
                WorkflowState::new(execution_id.to_string(), workflow, inputs),
                CheckpointReason::Started,
            ),
        };

        self.checkpoint.checkpoint(&mut state, reason).await?;
        self.drive(&mut state, run).await?;
        Ok(state)
    }

    async fn resume_inner(
        &self,
        execution_id: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<WorkflowState, ExecutorError> {
        let guard = self.claim(execution_id).await?;
        let result = self.resume_claimed(execution_id, inputs, &guard.run).await;
        self.release(execution_id).await;
        drop(guard);
        result
    }

    async fn resume_claimed(
        &self,
        execution_id: &str,
        inputs: BTreeMap<String, Value>,
        run: &ActiveRun,
    ) -> Result<WorkflowState, ExecutorError> {
        let existing = self
            .checkpoint
            .restore(execution_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(execution_id.to_string()))?;

        let errors = validate_workflow(&existing.workflow);
        if !errors.is_empty() {
            return Err(WorkflowError::Validation(errors).into());
        }

        let mut state = Self::prepare_resume(existing, inputs)?;
        self.checkpoint
            .checkpoint(&mut state, CheckpointReason::Resumed)
            .await?;
        self.drive(&mut state, run).await?;
        Ok(state)
    }

    fn prepare_resume(
        mut state: WorkflowState,
        inputs: BTreeMap<String, Value>,
    ) -> Result<WorkflowState, ExecutorError> {
        if !state.status.is_resumable() {
            return Err(ExecutorError::NotResumable {
                execution_id: state.execution_id,
                status: state.status,
            });
        }
        tracing::info!(
            execution_id = %state.execution_id,
            workflow = %state.workflow_name,
            previous_status = %state.status,
            completed = state.completed_steps().len(),
            "Resuming execution"
        );
        state.status = ExecutionStatus::Running;
        state.error = None;
        state.current_step = None;
        state.variables.extend(inputs);
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Cancel and pause
    // -----------------------------------------------------------------------

    /// Stop an execution, waiting until its final status is durable.
    ///
    /// - Active here: trip the run's token and wait for it to finish.
    /// - Leased by another process: leave a stop request in the lease and
    ///   poll the store until the owner persists a final status.
    /// - Not running anywhere (paused, or `running` with an expired lease):
    ///   a cancel rewrites the status directly; a pause does nothing.
    ///
    /// Returns whether the execution ended in the requested status.
    async fn stop(&self, execution_id: &str, kind: StopKind) -> Result<bool, ExecutorError> {
        let target = kind.target_status();
        loop {
            let active = self.active.get(execution_id).map(|run| run.clone());
            if let Some(run) = active {
                run.token(kind).cancel();
                let mut finished = run.finished;
                // The sender is only dropped after the final checkpoint.
                let _ = finished.wait_for(|done| *done).await;
                let status = self.load_status(execution_id).await?;
                if status == ExecutionStatus::Paused && kind == StopKind::Cancel {
                    // Paused before the cancel landed; rewrite it offline.
                    continue;
                }
                return Ok(status == target);
            }

            match self.claim(execution_id).await {
                Ok(guard) => {
                    let stopped = self.stop_inactive(execution_id, kind).await;
                    self.release(execution_id).await;
                    drop(guard);
                    return stopped;
                }
                Err(ExecutorError::Conflict(_)) if self.is_active(execution_id) => {
                    tokio::task::yield_now().await;
                }
                Err(ExecutorError::Conflict(_)) => {
                    if let Some(stopped) = self.stop_remote(execution_id, kind).await? {
                        return Ok(stopped);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_status(&self, execution_id: &str) -> Result<ExecutionStatus, ExecutorError> {
        self.checkpoint
            .restore(execution_id)
            .await?
            .map(|state| state.status)
            .ok_or_else(|| ExecutorError::NotFound(execution_id.to_string()))
    }

    /// Rewrite an execution nobody is driving. Requires the claim.
    async fn stop_inactive(&self, execution_id: &str, kind: StopKind) -> Result<bool, ExecutorError> {
        let mut state = self
            .checkpoint
            .restore(execution_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(execution_id.to_string()))?;

        if kind != StopKind::Cancel {
            return Ok(false);
        }
        if !matches!(
            state.status,
            ExecutionStatus::Running | ExecutionStatus::Paused
        ) {
            return Ok(false);
        }

        state.status = ExecutionStatus::Cancelled;
        state.current_step = None;
        self.checkpoint
            .checkpoint(&mut state, CheckpointReason::Terminal)
            .await?;
        tracing::info!(execution_id, status = %state.status, "Stopped inactive execution");
        Ok(true)
    }

    /// Ask the lease holder to stop and wait for its final status.
    ///
    /// Returns `None` when the lease lapsed or was released before the
    /// owner settled, so the caller should try to claim the id itself.
    async fn stop_remote(
        &self,
        execution_id: &str,
        kind: StopKind,
    ) -> Result<Option<bool>, ExecutorError> {
        let target = kind.target_status();
        tracing::info!(execution_id, stop = ?kind, "Requesting stop from lease holder");
        loop {
            let accepted = self
                .store()
                .request_stop(execution_id, kind, Utc::now())
                .await?;
            let status = self
                .checkpoint
                .restore(execution_id)
                .await?
                .map(|state| state.status);

            match status {
                // A pause can still be overridden once the owner lets go.
                Some(ExecutionStatus::Paused) if kind == StopKind::Cancel => {}
                Some(status) if status != ExecutionStatus::Running => {
                    return Ok(Some(status == target));
                }
                _ => {}
            }
            if !accepted {
                return Ok(None);
            }
            tokio::time::sleep(self.heartbeat_period()).await;
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch loop
    // -----------------------------------------------------------------------

    /// Run the dispatch loop until nothing is ready and nothing is in flight,
    /// then persist the final status.
    async fn drive(&self, state: &mut WorkflowState, run: &ActiveRun) -> Result<(), ExecutorError> {
        let workflow = state.workflow.clone();
        let max_concurrency = self.config.max_concurrency.max(1);
        let execution_id = state.execution_id.clone();

        tracing::info!(
            execution_id = %execution_id,
            workflow = %workflow.name,
            steps = workflow.steps.len(),
            max_concurrency,
            "Execution started"
        );

        // Tripped on cancel/pause so steps stop retrying.
        let task_stop = CancellationToken::new();
        let mut join_set: JoinSet<StepResult> = JoinSet::new();
        let mut task_steps: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut in_flight: BTreeSet<String> = BTreeSet::new();
        let mut finished_this_run: HashSet<String> = HashSet::new();
        let mut halt: Option<Halt> = None;
        let mut fatal: Option<ExecutorError> = None;
        let mut lost = false;

        let period = self.heartbeat_period();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Cancel overrides a pending pause; nothing overrides a failure.
            if run.cancel.is_cancelled() && !matches!(halt, Some(Halt::Cancelled | Halt::Failed)) {
                halt = Some(Halt::Cancelled);
                task_stop.cancel();
            } else if run.pause.is_cancelled() && halt.is_none() {
                halt = Some(Halt::Paused);
                task_stop.cancel();
            }

            if halt.is_none() {
                let mut dispatched = false;
                for step in &workflow.steps {
                    if in_flight.len() >= max_concurrency {
                        break;
                    }
                    if !Self::is_ready(state, step, &in_flight, &finished_this_run) {
                        continue;
                    }
                    let step_id = step.id.clone();
                    let handle = {
                        let runner = self.runner.clone();
                        let step = step.clone();
                        let bindings = state.variables.clone();
                        let settings = self.step_settings(&step);
                        let stop = task_stop.clone();
                        join_set.spawn(async move {
                            runner.run(&step, &bindings, &settings, &stop).await
                        })
                    };
                    tracing::info!(execution_id = %execution_id, step_id = %step_id, "Step dispatched");
                    task_steps.insert(handle.id(), step_id.clone());
                    in_flight.insert(step_id);
                    dispatched = true;
                }
                if dispatched {
                    state.current_step = in_flight.iter().next().cloned();
                    if let Err(e) = self
                        .checkpoint
                        .checkpoint(state, CheckpointReason::Dispatched)
                        .await
                    {
                        Self::record_fatal(&execution_id, e, &mut fatal, &mut halt, &task_stop);
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    let result = match joined {
                        Ok((id, result)) => {
                            task_steps.remove(&id);
                            result
                        }
                        Err(join_err) => {
                            let step_id = task_steps.remove(&join_err.id()).unwrap_or_default();
                            Self::crashed_result(step_id, &join_err)
                        }
                    };
                    let step_id = result.step_id.clone();
                    in_flight.remove(&step_id);
                    finished_this_run.insert(step_id.clone());

                    if result.success {
                        merge_outputs(&mut state.variables, &step_id, &result.outputs);
                        tracing::info!(
                            execution_id = %execution_id,
                            step_id = %step_id,
                            attempts = result.attempts,
                            duration_ms = result.duration_ms,
                            "Step completed"
                        );
                    } else {
                        let failure = result.error.clone().unwrap_or(StepFailure {
                            category: ErrorCategory::Internal,
                            message: "step failed without error details".to_string(),
                            retryable: false,
                        });
                        tracing::warn!(
                            execution_id = %execution_id,
                            step_id = %step_id,
                            attempts = result.attempts,
                            category = %failure.category,
                            error = %failure.message,
                            "Step failed"
                        );
                        if halt.is_none() {
                            halt = Some(Halt::Failed);
                            state.error = Some(ExecutionError {
                                step_id: Some(step_id.clone()),
                                category: failure.category,
                                message: failure.message,
                            });
                        }
                    }

                    state.step_results.insert(step_id, result);
                    state.current_step = in_flight.iter().next().cloned();
                    if lost {
                        continue;
                    }
                    if !self.sync_lease(&execution_id, run).await {
                        Self::record_lost(&execution_id, &mut lost, &mut halt, &task_stop);
                        continue;
                    }
                    if let Err(e) = self
                        .checkpoint
                        .checkpoint(state, CheckpointReason::StepFinished)
                        .await
                    {
                        Self::record_fatal(&execution_id, e, &mut fatal, &mut halt, &task_stop);
                    }
                }
                _ = run.cancel.cancelled(), if !matches!(halt, Some(Halt::Cancelled | Halt::Failed)) => {
                    tracing::info!(execution_id = %execution_id, in_flight = in_flight.len(), "Cancellation requested");
                }
                _ = run.pause.cancelled(), if halt.is_none() => {
                    tracing::info!(execution_id = %execution_id, in_flight = in_flight.len(), "Pause requested");
                }
                _ = heartbeat.tick(), if !lost => {
                    if !self.sync_lease(&execution_id, run).await {
                        Self::record_lost(&execution_id, &mut lost, &mut halt, &task_stop);
                    }
                }
            }
        }

        if lost {
            // The new owner writes from here on.
            return Err(ExecutorError::LeaseLost(execution_id));
        }

        state.current_step = None;
        let all_succeeded = workflow.steps.iter().all(|s| state.has_succeeded(&s.id));
        state.status = match halt {
            Some(Halt::Failed) => ExecutionStatus::Failed,
            _ if all_succeeded => {
                state.error = None;
                ExecutionStatus::Completed
            }
            Some(Halt::Cancelled) => ExecutionStatus::Cancelled,
            Some(Halt::Paused) => ExecutionStatus::Paused,
            None => {
                state.error = Some(ExecutionError {
                    step_id: None,
                    category: ErrorCategory::Internal,
                    message: "no runnable steps remain".to_string(),
                });
                ExecutionStatus::Failed
            }
        };

        let saved = self
            .checkpoint
            .checkpoint(state, CheckpointReason::Terminal)
            .await;

        tracing::info!(
            execution_id = %execution_id,
            workflow = %workflow.name,
            status = %state.status,
            completed = state.completed_steps().len(),
            total = workflow.steps.len(),
            "Execution finished"
        );

        if let Some(err) = fatal {
            return Err(err);
        }
        saved?;
        Ok(())
    }

    fn is_ready(
        state: &WorkflowState,
        step: &StepDefinition,
        in_flight: &BTreeSet<String>,
        finished_this_run: &HashSet<String>,
    ) -> bool {
        !state.has_succeeded(&step.id)
            && !in_flight.contains(&step.id)
            && !finished_this_run.contains(&step.id)
            && step.depends_on.iter().all(|dep| state.has_succeeded(dep))
    }

    fn record_fatal(
        execution_id: &str,
        err: CheckpointError,
        fatal: &mut Option<ExecutorError>,
        halt: &mut Option<Halt>,
        task_stop: &CancellationToken,
    ) {
        tracing::error!(execution_id, error = %err, "Checkpoint failed, halting execution");
        *halt = Some(Halt::Failed);
        task_stop.cancel();
        if fatal.is_none() {
            *fatal = Some(err.into());
        }
    }

    fn record_lost(
        execution_id: &str,
        lost: &mut bool,
        halt: &mut Option<Halt>,
        task_stop: &CancellationToken,
    ) {
        tracing::error!(execution_id, "Execution lease taken over, abandoning run");
        *lost = true;
        *halt = Some(Halt::Failed);
        task_stop.cancel();
    }

    fn crashed_result(step_id: String, err: &tokio::task::JoinError) -> StepResult {
        let now = Utc::now();
        StepResult {
            step_id,
            success: false,
            outputs: BTreeMap::new(),
            duration_ms: 0,
            attempts: 1,
            error: Some(StepFailure {
                category: ErrorCategory::Internal,
                message: format!("step task aborted: {err}"),
                retryable: false,
            }),
            started_at: now,
            completed_at: now,
        }
    }
}

impl<S: StateStore + 'static> WorkflowExecutor for DagExecutor<S> {
    async fn execute(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<WorkflowState, ExecutorError> {
        self.execute_inner(workflow, inputs, execution_id).await
    }

    async fn resume(
        &self,
        execution_id: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<WorkflowState, ExecutorError> {
        self.resume_inner(execution_id, inputs).await
    }

    async fn cancel(&self, execution_id: &str) -> Result<bool, ExecutorError> {
        self.stop(execution_id, StopKind::Cancel).await
    }

    async fn pause(&self, execution_id: &str) -> Result<bool, ExecutorError> {
        self.stop(execution_id, StopKind::Pause).await
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
