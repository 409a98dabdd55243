use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::JobId;
use crate::urlnorm::{extract_domain, normalize_url};

/// Lifecycle of a frontier entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Done => "done",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Done | EntryStatus::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EntryStatus::Pending),
            "processing" => Ok(EntryStatus::Processing),
            "done" => Ok(EntryStatus::Done),
            "failed" => Ok(EntryStatus::Failed),
            _ => Err(format!("Unknown entry status: {}", s)),
        }
    }
}

/// A URL waiting in (or finished with) a job's frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub id: Uuid,
    pub job_id: JobId,
    pub url: String,
    pub normalized_url: String,
    pub domain: String,
    pub priority: f64,
    pub depth: u32,
    pub status: EntryStatus,
    pub parent_url: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Not claimable before this instant; set on transient re-queue.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Insertion order, the final tie-break.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate for `FrontierStore::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFrontierEntry {
    pub job_id: JobId,
    pub url: String,
    pub normalized_url: String,
    pub domain: String,
    pub priority: f64,
    pub depth: u32,
    pub parent_url: Option<String>,
}

impl NewFrontierEntry {
    /// Normalizes `url`; malformed URLs are rejected here.
    pub fn new(job_id: JobId, url: &str) -> Result<Self, AppError> {
        let normalized = normalize_url(url)?;
        Ok(Self {
            job_id,
            url: url.trim().to_string(),
            domain: extract_domain(&normalized)?,
            normalized_url: normalized.into(),
            priority: 0.0,
            depth: 0,
            parent_url: None,
        })
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = if priority.is_finite() { priority } else { 0.0 };
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_parent(mut self, parent_url: impl Into<String>) -> Self {
        self.parent_url = Some(parent_url.into());
        self
    }
}

/// Result of an enqueue attempt. Only `Inserted` changes the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted(Uuid),
    /// Same `(job_id, normalized_url)` already present.
    Duplicate,
    /// The job already holds `max_pages` entries.
    LimitReached,
    /// Entry depth exceeds the job's `max_depth`.
    TooDeep,
}

impl EnqueueOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, EnqueueOutcome::Inserted(_))
    }
}

/// How a claimed entry finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Done,
    /// Duplicate content or URL; terminal but not a failure.
    Skipped { reason: String },
    /// Re-queued with backoff until the retry budget runs out. Counts
    /// against the domain.
    TransientFailure { error: String },
    /// Failed for this item only.
    PermanentFailure { error: String },
    /// Handed to the dead-letter path with its full history.
    DeadLettered { reason: String },
}

impl CompletionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CompletionOutcome::Done => "done",
            CompletionOutcome::Skipped { .. } => "skipped",
            CompletionOutcome::TransientFailure { .. } => "transient_failure",
            CompletionOutcome::PermanentFailure { .. } => "permanent_failure",
            CompletionOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Message stored in `last_error`, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            CompletionOutcome::Done => None,
            CompletionOutcome::Skipped { reason } | CompletionOutcome::DeadLettered { reason } => {
                Some(reason)
            }
            CompletionOutcome::TransientFailure { error }
            | CompletionOutcome::PermanentFailure { error } => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompletionOutcome::Done | CompletionOutcome::Skipped { .. })
    }
}
