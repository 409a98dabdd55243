//! Single-process frontier. One mutex guards all state and is never held
//! across an await.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::AppError;
use crate::job::{FrontierCounts, JobConfig, JobId};

use super::{
    CompletionOutcome, DomainState, EnqueueOutcome, EntryStatus, FrontierConfig, FrontierEntry,
    FrontierStore, NewFrontierEntry,
};

/// Claim order: priority desc, depth asc, insertion asc.
#[derive(Debug, Clone, Copy)]
struct PendingKey {
    priority: f64,
    depth: u32,
    seq: i64,
    id: Uuid,
}

impl PendingKey {
    fn of(entry: &FrontierEntry) -> Self {
        Self {
            priority: entry.priority,
            depth: entry.depth,
            seq: entry.seq,
            id: entry.id,
        }
    }
}

impl Ord for PendingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then(self.depth.cmp(&other.depth))
            .then(self.seq.cmp(&other.seq))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for PendingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingKey {}

struct JobSlot {
    config: JobConfig,
    total: u64,
    pending: BTreeSet<PendingKey>,
}

#[derive(Default)]
struct FrontierInner {
    jobs: HashMap<JobId, JobSlot>,
    entries: HashMap<Uuid, FrontierEntry>,
    keys: HashSet<(JobId, String)>,
    domains: HashMap<String, DomainState>,
    next_seq: i64,
}

#[derive(Clone)]
pub struct MemoryFrontier {
    config: Arc<FrontierConfig>,
    clock: SharedClock,
    inner: Arc<Mutex<FrontierInner>>,
}

impl MemoryFrontier {
    pub fn new(config: FrontierConfig, clock: SharedClock) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            inner: Arc::new(Mutex::new(FrontierInner::default())),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned frontier mutex");
            poisoned.into_inner()
        })
    }

    fn domain_entry<'a>(
        domains: &'a mut HashMap<String, DomainState>,
        domain: &str,
        config: &FrontierConfig,
    ) -> &'a mut DomainState {
        domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain, config.default_crawl_delay))
    }
}

impl FrontierStore for MemoryFrontier {
    async fn register_job(&self, job: &JobConfig) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        match inner.jobs.get_mut(&job.job_id) {
            Some(slot) => slot.config = job.clone(),
            None => {
                inner.jobs.insert(
                    job.job_id,
                    JobSlot {
                        config: job.clone(),
                        total: 0,
                        pending: BTreeSet::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn enqueue(&self, new: NewFrontierEntry) -> Result<EnqueueOutcome, AppError> {
        let now = self.clock.now();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let slot = inner
            .jobs
            .get_mut(&new.job_id)
            .ok_or(AppError::UnknownJob(new.job_id))?;

        if new.depth > slot.config.max_depth {
            return Ok(EnqueueOutcome::TooDeep);
        }
        let key = (new.job_id, new.normalized_url.clone());
        if inner.keys.contains(&key) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        if slot.total >= slot.config.max_pages {
            return Ok(EnqueueOutcome::LimitReached);
        }

        inner.next_seq += 1;
        let entry = FrontierEntry {
            id: Uuid::new_v4(),
            job_id: new.job_id,
            url: new.url,
            normalized_url: new.normalized_url,
            domain: new.domain,
            priority: new.priority,
            depth: new.depth,
            status: EntryStatus::Pending,
            parent_url: new.parent_url,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            seq: inner.next_seq,
            created_at: now,
            updated_at: now,
        };
        let id = entry.id;

        slot.total += 1;
        slot.pending.insert(PendingKey::of(&entry));
        inner.keys.insert(key);
        inner.entries.insert(id, entry);

        Ok(EnqueueOutcome::Inserted(id))
    }

    async fn claim_next(&self, job_id: JobId) -> Result<Option<FrontierEntry>, AppError> {
        let now = self.clock.now();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let slot = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(AppError::UnknownJob(job_id))?;

        let candidate = slot
            .pending
            .iter()
            .find(|key| {
                inner.entries.get(&key.id).is_some_and(|entry| {
                    entry.next_attempt_at.is_none_or(|at| at <= now)
                        && inner
                            .domains
                            .get(&entry.domain)
                            .is_none_or(|d| d.is_eligible(now))
                })
            })
            .copied();

        let Some(key) = candidate else {
            return Ok(None);
        };
        slot.pending.remove(&key);

        let Some(entry) = inner.entries.get_mut(&key.id) else {
            return Ok(None);
        };
        entry.status = EntryStatus::Processing;
        entry.updated_at = now;

        Self::domain_entry(&mut inner.domains, &entry.domain, &self.config).record_claim(now);

        tracing::debug!(
            job_id = %job_id,
            entry_id = %entry.id,
            domain = %entry.domain,
            "Claimed frontier entry"
        );
        Ok(Some(entry.clone()))
    }

    async fn complete(&self, entry: &FrontierEntry, outcome: &CompletionOutcome) -> Result<(), AppError> {
        let now = self.clock.now();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let Some(stored) = inner.entries.get_mut(&entry.id) else {
            tracing::warn!(entry_id = %entry.id, "Completion for unknown frontier entry");
            return Ok(());
        };
        if stored.status != EntryStatus::Processing {
            tracing::warn!(
                entry_id = %entry.id,
                status = %stored.status,
                "Ignoring completion for entry not in processing"
            );
            return Ok(());
        }

        stored.updated_at = now;
        stored.last_error = outcome.message().map(str::to_string);
        let domain = Self::domain_entry(&mut inner.domains, &stored.domain, &self.config);

        match outcome {
            CompletionOutcome::Done => {
                stored.status = EntryStatus::Done;
                domain.record_success();
            }
            CompletionOutcome::Skipped { .. } => {
                stored.status = EntryStatus::Done;
            }
            CompletionOutcome::TransientFailure { .. } => {
                domain.record_failure(now, &self.config);
                if stored.retry_count < self.config.max_item_retries {
                    stored.retry_count += 1;
                    stored.status = EntryStatus::Pending;
                    stored.next_attempt_at =
                        Some(self.config.next_attempt_at(now, stored.retry_count));
                    if let Some(slot) = inner.jobs.get_mut(&stored.job_id) {
                        slot.pending.insert(PendingKey::of(stored));
                    }
                } else {
                    stored.status = EntryStatus::Failed;
                }
            }
            CompletionOutcome::PermanentFailure { .. } | CompletionOutcome::DeadLettered { .. } => {
                stored.status = EntryStatus::Failed;
            }
        }

        tracing::debug!(
            entry_id = %entry.id,
            outcome = outcome.label(),
            status = %stored.status,
            "Completed frontier entry"
        );
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<FrontierEntry>, AppError> {
        Ok(self.lock_inner().entries.get(&id).cloned())
    }

    async fn domain_state(&self, domain: &str) -> Result<Option<DomainState>, AppError> {
        Ok(self.lock_inner().domains.get(domain).cloned())
    }

    async fn record_robots(
        &self,
        domain: &str,
        robots_txt: &str,
        crawl_delay: Option<Duration>,
    ) -> Result<(), AppError> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        Self::domain_entry(&mut inner.domains, domain, &self.config).set_robots(
            robots_txt,
            now,
            crawl_delay,
            &self.config,
        );
        Ok(())
    }

    async fn adapt_crawl_delay(
        &self,
        domain: &str,
        response_time: Duration,
        floor: Duration,
    ) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        Self::domain_entry(&mut inner.domains, domain, &self.config).adapt_crawl_delay(
            response_time,
            floor,
            &self.config,
        );
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, AppError> {
        let now = self.clock.now();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let Some(entry) = inner.entries.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != EntryStatus::Failed {
            return Ok(false);
        }
        let Some(slot) = inner.jobs.get_mut(&entry.job_id) else {
            return Ok(false);
        };

        entry.status = EntryStatus::Pending;
        entry.retry_count = 0;
        entry.next_attempt_at = None;
        entry.last_error = None;
        entry.updated_at = now;
        slot.pending.insert(PendingKey::of(entry));

        tracing::info!(entry_id = %id, job_id = %entry.job_id, "Re-queued failed frontier entry");
        Ok(true)
    }

    async fn release_processing(&self, job_id: JobId) -> Result<u64, AppError> {
        let now = self.clock.now();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let Some(slot) = inner.jobs.get_mut(&job_id) else {
            return Ok(0);
        };
        let mut released = 0;
        for entry in inner
            .entries
            .values_mut()
            .filter(|e| e.job_id == job_id && e.status == EntryStatus::Processing)
        {
            entry.status = EntryStatus::Pending;
            entry.updated_at = now;
            slot.pending.insert(PendingKey::of(entry));
            released += 1;
        }
        if released > 0 {
            tracing::info!(job_id = %job_id, released, "Released processing entries");
        }
        Ok(released)
    }

    async fn status_counts(&self, job_id: JobId) -> Result<FrontierCounts, AppError> {
        let inner = self.lock_inner();
        if !inner.jobs.contains_key(&job_id) {
            return Err(AppError::UnknownJob(job_id));
        }
        let mut counts = FrontierCounts::default();
        for entry in inner.entries.values().filter(|e| e.job_id == job_id) {
            match entry.status {
                EntryStatus::Pending => counts.pending += 1,
                EntryStatus::Processing => counts.processing += 1,
                EntryStatus::Done => counts.done += 1,
                EntryStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
