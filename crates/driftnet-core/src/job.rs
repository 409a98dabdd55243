use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::Tier;

pub type JobId = Uuid;

/// Settings for one ingestion job.
///
/// Language and tier fall back to the orchestrator defaults when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: JobId,
    /// Maximum number of frontier entries the job may ever hold.
    pub max_pages: u64,
    /// Entries deeper than this are never enqueued.
    pub max_depth: u32,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub tier: Option<Tier>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            max_pages: 10_000,
            max_depth: 3,
            source_lang: None,
            target_lang: None,
            tier: None,
        }
    }
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_languages(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_lang = Some(source.into());
        self.target_lang = Some(target.into());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Frontier entries of a job grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

/// Operator view of a job's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCounts {
    pub queued: u64,
    pub in_progress: u64,
    pub done: u64,
    /// All failed entries, dead-lettered ones included.
    pub failed: u64,
    pub dead_lettered: u64,
}

impl JobStatusCounts {
    pub fn from_frontier(counts: FrontierCounts, dead_lettered: u64) -> Self {
        Self {
            queued: counts.pending,
            in_progress: counts.processing,
            done: counts.done,
            failed: counts.failed,
            dead_lettered,
        }
    }

    /// Nothing left to claim or finish.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.in_progress == 0
    }
}
