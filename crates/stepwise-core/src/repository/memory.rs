//! In-memory state store.
//!
//! Process-lifetime only. Used by tests and by callers that do not need
//! resumability across restarts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepwise_types::error::StoreError;
use stepwise_types::execution::{
    ExecutionFilter, ExecutionSummary, LeaseRenewal, StopKind, WorkflowState,
};

use super::state::StateStore;

#[derive(Debug, Clone)]
struct LeaseRecord {
    owner: String,
    expires_at: DateTime<Utc>,
    stop: Option<StopKind>,
}

/// Shared by several engines, it stands in for one database used by
/// several processes.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, WorkflowState>,
    leases: DashMap<String, LeaseRecord>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Current lease owner, live or not.
    pub fn lease_owner(&self, execution_id: &str) -> Option<String> {
        self.leases.get(execution_id).map(|l| l.owner.clone())
    }

    /// Stop request waiting for the lease holder to pick it up.
    pub fn pending_stop(&self, execution_id: &str) -> Option<StopKind> {
        self.leases.get(execution_id).and_then(|l| l.stop)
    }
}

impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.states
            .insert(state.execution_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self.states.get(execution_id).map(|s| s.value().clone()))
    }

    async fn delete(&self, execution_id: &str) -> Result<bool, StoreError> {
        Ok(self.states.remove(execution_id).is_some())
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSummary>, StoreError> {
        let mut summaries: Vec<ExecutionSummary> = self
            .states
            .iter()
            .map(|entry| entry.value().summary())
            .filter(|summary| filter.matches(summary))
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        summaries.truncate(filter.limit);
        Ok(summaries)
    }

    async fn acquire_lease(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let fresh = LeaseRecord {
            owner: owner.to_string(),
            expires_at,
            stop: None,
        };
        match self.leases.entry(execution_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.owner == owner || current.expires_at < now {
                    entry.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn renew_lease(
        &self,
        execution_id: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LeaseRenewal, StoreError> {
        match self.leases.get_mut(execution_id) {
            Some(mut lease) if lease.owner == owner => {
                lease.expires_at = expires_at;
                Ok(LeaseRenewal {
                    held: true,
                    stop: lease.stop,
                })
            }
            _ => Ok(LeaseRenewal {
                held: false,
                stop: None,
            }),
        }
    }

    async fn release_lease(&self, execution_id: &str, owner: &str) -> Result<(), StoreError> {
        self.leases.remove_if(execution_id, |_, lease| lease.owner == owner);
        Ok(())
    }

    async fn request_stop(
        &self,
        execution_id: &str,
        kind: StopKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.leases.get_mut(execution_id) {
            Some(mut lease) if lease.expires_at >= now => {
                lease.stop = Some(StopKind::merge(lease.stop, kind));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
