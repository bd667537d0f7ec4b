//! The append-only audit log.

use crate::error::AuditError;
use crate::record::{AuditRecord, Outcome};
use crate::storage::{AuditStorage, create_storage};
use chrono::{DateTime, Utc};
use kintent_core::AuditConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Append-only log of reconcile attempts.
///
/// Sequence numbers are assigned under a lock in completion order, and a
/// number is only consumed once the record is durably stored.
pub struct AuditLog {
    storage: Arc<dyn AuditStorage>,
    next_sequence: Mutex<u64>,
}

impl AuditLog {
    /// Open the log described by `config`.
    pub fn open(config: &AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = Arc::from(create_storage(config)?);
        Ok(Self::with_storage(storage))
    }

    /// Create a log over a custom storage backend.
    pub fn with_storage(storage: Arc<dyn AuditStorage>) -> Self {
        let next = storage.last_sequence().map(|s| s + 1).unwrap_or(0);
        Self {
            storage,
            next_sequence: Mutex::new(next),
        }
    }

    /// Assign `sequence` and `recorded_at`, then persist.
    pub async fn append(&self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        let mut next = self.next_sequence.lock().await;
        record.sequence = *next;
        record.recorded_at = Utc::now();

        self.storage.store(&record).await?;
        *next += 1;

        tracing::debug!(
            record_id = %record.id,
            sequence = record.sequence,
            correlation_id = %record.correlation_id,
            attempt = record.attempt,
            outcome = %record.outcome,
            "Audit record appended"
        );
        Ok(record)
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.storage.query(filter).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        self.storage.get(id).await
    }
}

/// Filter for querying audit records.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Records at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Records at or before this time.
    pub until: Option<DateTime<Utc>>,
    /// Filter by intent resource name.
    pub name: Option<String>,
    /// Filter by intent namespace.
    pub namespace: Option<String>,
    pub outcome: Option<Outcome>,
    pub correlation_id: Option<Uuid>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if self.since.is_some_and(|since| record.recorded_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.recorded_at > until) {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| n != record.intent.name()) {
            return false;
        }
        if self
            .namespace
            .as_deref()
            .is_some_and(|ns| ns != record.intent.namespace())
        {
            return false;
        }
        if self.outcome.is_some_and(|o| o != record.outcome) {
            return false;
        }
        if self
            .correlation_id
            .is_some_and(|id| id != record.correlation_id)
        {
            return false;
        }
        true
    }
}
