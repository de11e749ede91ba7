//! SQLite state store implementation.
//!
//! Implements `StateStore` from `stepwise-core` using sqlx with split
//! read/write pools. Each execution is one row: the whole `WorkflowState` as
//! a JSON blob plus a few denormalized columns for listing. Ownership
//! leases live in `execution_leases`, one row per driven execution.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use stepwise_core::repository::StateStore;
use stepwise_types::error::StoreError;
use stepwise_types::execution::{
    ExecutionFilter, ExecutionStatus, ExecutionSummary, LeaseRenewal, StopKind, WorkflowState,
};

use super::pool::DatabasePool;

/// SQLite-backed implementation of [`StateStore`].
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct SummaryRow {
    execution_id: String,
    workflow_name: String,
    status: String,
    current_step: Option<String>,
    completed_steps: i64,
    total_steps: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SummaryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            completed_steps: row.try_get("completed_steps")?,
            total_steps: row.try_get("total_steps")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_summary(self) -> Result<ExecutionSummary, StoreError> {
        let status: ExecutionStatus = self.status.parse().map_err(StoreError::Serialization)?;
        Ok(ExecutionSummary {
            execution_id: self.execution_id,
            workflow_name: self.workflow_name,
            status,
            current_step: self.current_step,
            completed_steps: self.completed_steps.max(0) as usize,
            total_steps: self.total_steps.max(0) as usize,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("invalid datetime '{s}': {e}")))
}

// Fixed-width so lexicographic order in SQL matches chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn stop_kind_str(kind: StopKind) -> &'static str {
    match kind {
        StopKind::Cancel => "cancel",
        StopKind::Pause => "pause",
    }
}

fn parse_stop_kind(s: &str) -> Result<StopKind, StoreError> {
    match s {
        "cancel" => Ok(StopKind::Cancel),
        "pause" => Ok(StopKind::Pause),
        other => Err(StoreError::Serialization(format!("invalid stop request '{other}'"))),
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// StateStore impl
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let blob = serde_json::to_string(state)
            .map_err(|e| StoreError::Serialization(format!("serialize state: {e}")))?;
        let summary = state.summary();

        sqlx::query(
            r#"INSERT INTO executions
               (execution_id, workflow_name, status, current_step, completed_steps,
                total_steps, error, created_at, updated_at, state)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 workflow_name = excluded.workflow_name,
                 status = excluded.status,
                 current_step = excluded.current_step,
                 completed_steps = excluded.completed_steps,
                 total_steps = excluded.total_steps,
                 error = excluded.error,
                 updated_at = excluded.updated_at,
                 state = excluded.state"#,
        )
        .bind(&summary.execution_id)
        .bind(&summary.workflow_name)
        .bind(summary.status.as_str())
        .bind(&summary.current_step)
        .bind(summary.completed_steps as i64)
        .bind(summary.total_steps as i64)
        .bind(&summary.error)
        .bind(format_datetime(&summary.created_at))
        .bind(format_datetime(&summary.updated_at))
        .bind(&blob)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query("SELECT state FROM executions WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let blob: String = row.try_get("state").map_err(query_error)?;
                let state = serde_json::from_str(&blob).map_err(|e| {
                    StoreError::Serialization(format!(
                        "invalid state JSON for execution '{execution_id}': {e}"
                    ))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, execution_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM executions WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT execution_id, workflow_name, status, current_step, completed_steps,
                      total_steps, error, created_at, updated_at
               FROM executions
               WHERE (?1 IS NULL OR workflow_name = ?1)
                 AND (?2 IS NULL OR status = ?2)
               ORDER BY created_at DESC, execution_id DESC
               LIMIT ?3"#,
        )
        .bind(filter.workflow_name.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = SummaryRow::from_row(row).map_err(query_error)?;
            summaries.push(r.into_summary()?);
        }
        Ok(summaries)
    }

    async fn acquire_lease(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The upsert's WHERE turns a live foreign lease into a no-op.
        let result = sqlx::query(
            r#"INSERT INTO execution_leases (execution_id, owner, expires_at, stop_request)
               VALUES (?1, ?2, ?3, NULL)
               ON CONFLICT(execution_id) DO UPDATE SET
                 owner = excluded.owner,
                 expires_at = excluded.expires_at,
                 stop_request = NULL
               WHERE execution_leases.owner = excluded.owner
                  OR execution_leases.expires_at < ?4"#,
        )
        .bind(execution_id)
        .bind(owner)
        .bind(format_datetime(&expires_at))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn renew_lease(
        &self,
        execution_id: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LeaseRenewal, StoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"UPDATE execution_leases SET expires_at = ?3
               WHERE execution_id = ?1 AND owner = ?2
               RETURNING stop_request"#,
        )
        .bind(execution_id)
        .bind(owner)
        .bind(format_datetime(&expires_at))
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_error)?;

        match row {
            Some((stop,)) => Ok(LeaseRenewal {
                held: true,
                stop: stop.as_deref().map(parse_stop_kind).transpose()?,
            }),
            None => Ok(LeaseRenewal {
                held: false,
                stop: None,
            }),
        }
    }

    async fn release_lease(&self, execution_id: &str, owner: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM execution_leases WHERE execution_id = ? AND owner = ?")
            .bind(execution_id)
            .bind(owner)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn request_stop(
        &self,
        execution_id: &str,
        kind: StopKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE execution_leases
               SET stop_request = CASE WHEN stop_request = 'cancel' THEN 'cancel' ELSE ?2 END
               WHERE execution_id = ?1 AND expires_at >= ?3"#,
        )
        .bind(execution_id)
        .bind(stop_kind_str(kind))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }
}
