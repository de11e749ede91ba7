//! Durable checkpoints of execution state.
//!
//! Wraps a [`StateStore`] so the executor records every transition the same
//! way: bump `updated_at`, persist the whole state, log it. A checkpoint call
//! returns only after the store reports the write durable.

use std::sync::Arc;

use stepwise_types::error::StoreError;
use stepwise_types::execution::WorkflowState;

use crate::repository::StateStore;

/// Why a checkpoint was taken. Logged with every save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointReason {
    Started,
    Resumed,
    Dispatched,
    StepFinished,
    Terminal,
}

impl CheckpointReason {
    fn as_str(&self) -> &'static str {
        match self {
            CheckpointReason::Started => "started",
            CheckpointReason::Resumed => "resumed",
            CheckpointReason::Dispatched => "dispatched",
            CheckpointReason::StepFinished => "step_finished",
            CheckpointReason::Terminal => "terminal",
        }
    }
}

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Persists execution state through a [`StateStore`].
///
/// Generic over `S: StateStore` so it works with any backend.
pub struct CheckpointManager<S: StateStore> {
    store: Arc<S>,
}

impl<S: StateStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stamp and persist `state`.
    pub async fn checkpoint(
        &self,
        state: &mut WorkflowState,
        reason: CheckpointReason,
    ) -> Result<(), CheckpointError> {
        state.touch();
        self.store.save(state).await?;
        tracing::debug!(
            execution_id = %state.execution_id,
            status = %state.status,
            reason = reason.as_str(),
            completed = state.step_results.values().filter(|r| r.success).count(),
            "checkpointed execution state"
        );
        Ok(())
    }

    /// Load a previously checkpointed state.
    pub async fn restore(&self, execution_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        Ok(self.store.load(execution_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stepwise_types::workflow::Workflow;

    use super::*;
    use crate::repository::InMemoryStateStore;

    #[tokio::test]
    async fn test_checkpoint_then_restore() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = CheckpointManager::new(store.clone());
        let workflow = Workflow {
            name: "wf".into(),
            version: "1".into(),
            description: None,
            variables: BTreeMap::new(),
            steps: vec![],
        };
        let mut state = WorkflowState::new("e1", &workflow, BTreeMap::new());
        let before = state.updated_at;

        manager
            .checkpoint(&mut state, CheckpointReason::Started)
            .await
            .unwrap();
        assert!(state.updated_at >= before);

        let restored = manager.restore("e1").await.unwrap().unwrap();
        assert_eq!(restored, state);
        assert!(manager.restore("nope").await.unwrap().is_none());
    }
}
