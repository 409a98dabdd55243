//! Terminal storage for items that exhausted every retry and fallback.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Append-only record of an item that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    /// Owning ingestion job, when the payload came from the frontier.
    pub job_id: Option<Uuid>,
    pub original_payload: serde_json::Value,
    pub failure_reason: String,
    pub attempt_count: u32,
    pub first_attempted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        job_id: Option<Uuid>,
        original_payload: serde_json::Value,
        failure_reason: impl Into<String>,
        attempt_count: u32,
        first_attempted_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            original_payload,
            failure_reason: failure_reason.into(),
            attempt_count,
            first_attempted_at,
            created_at,
        }
    }
}

/// Persistence for dead-lettered items.
///
/// Entries are never updated; `drain` removes and returns the oldest first.
pub trait DeadLetterStore: Send + Sync + Clone {
    fn push(&self, entry: &DeadLetterEntry) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Oldest entries first, without removing them.
    fn list(&self, limit: usize)
    -> impl Future<Output = Result<Vec<DeadLetterEntry>, AppError>> + Send;

    fn count(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_for_job(&self, job_id: Uuid) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn drain(&self, limit: usize)
    -> impl Future<Output = Result<Vec<DeadLetterEntry>, AppError>> + Send;
}

/// In-process dead-letter queue.
#[derive(Clone, Default)]
pub struct MemoryDeadLetterQueue {
    entries: Arc<Mutex<VecDeque<DeadLetterEntry>>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned dead-letter mutex");
            poisoned.into_inner()
        })
    }
}

impl DeadLetterStore for MemoryDeadLetterQueue {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<(), AppError> {
        tracing::warn!(
            dead_letter_id = %entry.id,
            attempts = entry.attempt_count,
            reason = %entry.failure_reason,
            "Item moved to dead-letter queue"
        );
        self.lock_entries().push_back(entry.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, AppError> {
        Ok(self.lock_entries().iter().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<u64, AppError> {
        Ok(self.lock_entries().len() as u64)
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<u64, AppError> {
        Ok(self
            .lock_entries()
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .count() as u64)
    }

    async fn drain(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, AppError> {
        let mut entries = self.lock_entries();
        let n = limit.min(entries.len());
        Ok(entries.drain(..n).collect())
    }
}
