//! State store trait definition.

use chrono::{DateTime, Utc};
use stepwise_types::error::StoreError;
use stepwise_types::execution::{
    ExecutionFilter, ExecutionSummary, LeaseRenewal, StopKind, WorkflowState,
};

/// Durable persistence of [`WorkflowState`], keyed by execution id.
///
/// Stores serialize and deserialize; they never mutate a state. Concurrent
/// saves for different ids must not interfere. Saves for the same id are
/// serialized by the executor.
///
/// Ownership of an execution across processes sharing one store is an
/// expiring lease: the running executor renews it on a heartbeat, and other
/// processes reach the owner through stop requests recorded on the lease.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Insert or replace the state for `state.execution_id`.
    ///
    /// Returns once the write is durable for this backend.
    fn save(
        &self,
        state: &WorkflowState,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Load a state by execution id.
    fn load(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, StoreError>> + Send;

    /// Delete a state. Returns `true` if it existed.
    fn delete(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// List execution summaries matching `filter`, newest first.
    fn list(
        &self,
        filter: &ExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionSummary>, StoreError>> + Send;

    /// Take the ownership lease of `execution_id` for `owner` until
    /// `expires_at`.
    ///
    /// Succeeds when no lease exists, `owner` already holds it, or the
    /// current lease expired before `now`; pending stop requests are cleared.
    /// Returns `false` when another owner holds a live lease.
    fn acquire_lease(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Extend a lease held by `owner` and report pending stop requests.
    fn renew_lease(
        &self,
        execution_id: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<LeaseRenewal, StoreError>> + Send;

    /// Drop the lease if `owner` holds it.
    fn release_lease(
        &self,
        execution_id: &str,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Record a stop request on a lease that is live at `now`.
    ///
    /// A pending cancel is never downgraded to a pause. Returns `false` when
    /// no live lease exists.
    fn request_stop(
        &self,
        execution_id: &str,
        kind: StopKind,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
