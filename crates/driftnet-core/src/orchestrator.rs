use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::clock::{SharedClock, elapsed_between};
use crate::error::{AppError, ErrorClass};
use crate::events::{EventBus, EventMessage, ItemEvent, TOPIC_DEAD_LETTER};
use crate::fingerprint::{ContentFingerprint, DedupOutcome, FingerprintIndex, FingerprintStore};
use crate::frontier::{
    CompletionOutcome, FrontierConfig, FrontierEntry, FrontierStore, NewFrontierEntry, PriorityWeights,
};
use crate::job::{JobConfig, JobId};
use crate::models::Document;
use crate::reliability::{DeadLetterEntry, DeadLetterStore};
use crate::robots::RobotsRules;
use crate::router::{RouterError, Tier, TranslationRouter};
use crate::traits::{DocumentStore, Fetcher};
use crate::urlnorm::robots_url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Items in flight at once across all jobs.
    pub max_concurrency: usize,
    /// Budget for one item end to end.
    #[serde(with = "crate::config::serde_secs")]
    pub item_timeout: Duration,
    /// Pause between claim rounds when nothing is claimable.
    #[serde(with = "crate::config::serde_secs")]
    pub idle_poll_interval: Duration,
    /// Product token used for robots.txt matching.
    pub user_agent: String,
    pub respect_robots: bool,
    #[serde(with = "crate::config::serde_secs")]
    pub robots_ttl: Duration,
    pub source_lang: String,
    pub target_lang: String,
    pub tier: Tier,
    /// Scores seeds and discovered links.
    pub priority: PriorityWeights,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1000,
            item_timeout: Duration::from_secs(120),
            idle_poll_interval: Duration::from_millis(250),
            user_agent: "driftnet".to_string(),
            respect_robots: true,
            robots_ttl: Duration::from_secs(24 * 3600),
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            tier: Tier::Balanced,
            priority: PriorityWeights::default(),
        }
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent<'a> {
    Started {
        max_concurrency: usize,
    },
    Idle,
    ItemClaimed {
        entry: &'a FrontierEntry,
    },
    ItemFinished {
        entry: &'a FrontierEntry,
        outcome: &'a CompletionOutcome,
        document_id: Option<Uuid>,
    },
    ItemAborted {
        error: &'a str,
    },
    ShuttingDown {
        in_flight: usize,
    },
    Stopped {
        entries_released: u64,
    },
}

/// Trait for receiving orchestrator events (decoupled logging).
pub trait OrchestratorReporter: Send + Sync {
    fn report(&self, event: OrchestratorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl OrchestratorReporter for TracingReporter {
    fn report(&self, event: OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::Started { max_concurrency } => {
                tracing::info!(%max_concurrency, "Orchestrator started");
            }
            OrchestratorEvent::Idle => {
                tracing::trace!("Nothing claimable");
            }
            OrchestratorEvent::ItemClaimed { entry } => {
                tracing::debug!(
                    job_id = %entry.job_id,
                    entry_id = %entry.id,
                    url = %entry.url,
                    "Item claimed"
                );
            }
            OrchestratorEvent::ItemFinished {
                entry,
                outcome,
                document_id,
            } => {
                if outcome.is_success() {
                    tracing::info!(
                        job_id = %entry.job_id,
                        url = %entry.url,
                        outcome = outcome.label(),
                        ?document_id,
                        "Item finished"
                    );
                } else {
                    tracing::warn!(
                        job_id = %entry.job_id,
                        url = %entry.url,
                        outcome = outcome.label(),
                        error = outcome.message().unwrap_or_default(),
                        "Item failed"
                    );
                }
            }
            OrchestratorEvent::ItemAborted { error } => {
                tracing::error!(%error, "Item task aborted");
            }
            OrchestratorEvent::ShuttingDown { in_flight } => {
                tracing::info!(%in_flight, "Orchestrator shutting down");
            }
            OrchestratorEvent::Stopped { entries_released } => {
                tracing::info!(%entries_released, "Orchestrator stopped");
            }
        }
    }
}

/// Everything the pipeline talks to.
pub struct Collaborators<Q, I, D, F, S> {
    pub frontier: Q,
    pub fingerprints: FingerprintStore<I>,
    pub dead_letters: D,
    pub fetcher: F,
    pub documents: S,
    pub router: Arc<TranslationRouter>,
    pub events: Arc<dyn EventBus>,
    pub clock: SharedClock,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    config: JobConfig,
    paused: bool,
}

/// Jobs the orchestrator claims for, visited round-robin.
#[derive(Debug, Default)]
struct JobRegistry {
    jobs: Mutex<Vec<ActiveJob>>,
    cursor: AtomicUsize,
}

impl JobRegistry {
    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, Vec<ActiveJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Job registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn add(&self, config: JobConfig) {
        let mut jobs = self.lock_jobs();
        match jobs.iter_mut().find(|j| j.config.job_id == config.job_id) {
            Some(existing) => existing.config = config,
            None => jobs.push(ActiveJob {
                config,
                paused: false,
            }),
        }
    }

    fn set_paused(&self, job_id: JobId, paused: bool) -> bool {
        let mut jobs = self.lock_jobs();
        match jobs.iter_mut().find(|j| j.config.job_id == job_id) {
            Some(job) => {
                job.paused = paused;
                true
            }
            None => false,
        }
    }

    fn is_paused(&self, job_id: JobId) -> Option<bool> {
        self.lock_jobs()
            .iter()
            .find(|j| j.config.job_id == job_id)
            .map(|j| j.paused)
    }

    fn all(&self) -> Vec<JobId> {
        self.lock_jobs().iter().map(|j| j.config.job_id).collect()
    }

    /// Unpaused jobs, starting one further along on every call.
    fn rotation(&self) -> Vec<JobConfig> {
        let jobs = self.lock_jobs();
        let active: Vec<JobConfig> = jobs
            .iter()
            .filter(|j| !j.paused)
            .map(|j| j.config.clone())
            .collect();
        if active.is_empty() {
            return active;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % active.len();
        active[start..].iter().chain(&active[..start]).cloned().collect()
    }
}

/// Languages and tier an item is processed with.
#[derive(Debug, Clone)]
struct ItemSettings {
    source_lang: String,
    target_lang: String,
    tier: Tier,
}

/// Result of one claimed item, handed back to the driving loop.
#[derive(Debug)]
struct ItemReport {
    entry: FrontierEntry,
    outcome: CompletionOutcome,
    document_id: Option<Uuid>,
}

struct Pipeline<Q, I, D, F, S> {
    parts: Collaborators<Q, I, D, F, S>,
    config: OrchestratorConfig,
    adaptive_delay: bool,
}

/// Bounded-parallelism driver from frontier to storage.
///
/// A slot is taken before claiming, so while the pool is full entries
/// simply stay pending.
pub struct Orchestrator<Q, I, D, F, S> {
    pipeline: Arc<Pipeline<Q, I, D, F, S>>,
    jobs: Arc<JobRegistry>,
}

impl<Q, I, D, F, S> Orchestrator<Q, I, D, F, S>
where
    Q: FrontierStore + 'static,
    I: FingerprintIndex + 'static,
    D: DeadLetterStore + 'static,
    F: Fetcher + 'static,
    S: DocumentStore + 'static,
{
    pub fn new(
        parts: Collaborators<Q, I, D, F, S>,
        config: OrchestratorConfig,
        frontier_config: &FrontierConfig,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                parts,
                config,
                adaptive_delay: frontier_config.adaptive_delay,
            }),
            jobs: Arc::new(JobRegistry::default()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.pipeline.config
    }

    pub fn collaborators(&self) -> &Collaborators<Q, I, D, F, S> {
        &self.pipeline.parts
    }

    /// Starts claiming for a job (registration with the frontier is separate).
    pub fn add_job(&self, config: JobConfig) {
        self.jobs.add(config);
    }

    /// Stops future claims for a job. In-flight items run to completion.
    pub fn pause(&self, job_id: JobId) -> Result<(), AppError> {
        if !self.jobs.set_paused(job_id, true) {
            return Err(AppError::UnknownJob(job_id));
        }
        tracing::info!(%job_id, "Job paused");
        Ok(())
    }

    pub fn resume(&self, job_id: JobId) -> Result<(), AppError> {
        if !self.jobs.set_paused(job_id, false) {
            return Err(AppError::UnknownJob(job_id));
        }
        tracing::info!(%job_id, "Job resumed");
        Ok(())
    }

    pub fn is_paused(&self, job_id: JobId) -> Option<bool> {
        self.jobs.is_paused(job_id)
    }

    /// Run until cancellation. Returns the number of items finished.
    pub async fn run<R: OrchestratorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<usize, AppError> {
        self.drive(cancel_token, reporter, false).await
    }

    /// Run until nothing is claimable and nothing is in flight.
    ///
    /// Entries held back by a crawl delay, a domain block or a retry
    /// backoff count as not claimable.
    pub async fn run_until_idle<R: OrchestratorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<usize, AppError> {
        self.drive(cancel_token, reporter, true).await
    }

    async fn drive<R: OrchestratorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
        stop_when_idle: bool,
    ) -> Result<usize, AppError> {
        let config = &self.pipeline.config;
        let slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let mut in_flight: JoinSet<ItemReport> = JoinSet::new();
        let mut finished = 0usize;

        reporter.report(OrchestratorEvent::Started {
            max_concurrency: config.max_concurrency,
        });

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                finished += reap(joined, reporter);
            }
            if cancel_token.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                permit = slots.clone().acquire_owned() => permit
                    .map_err(|e| AppError::Generic(format!("concurrency pool closed: {e}")))?,
            };

            match self.claim_round_robin().await {
                Ok(Some((entry, settings))) => {
                    reporter.report(OrchestratorEvent::ItemClaimed { entry: &entry });
                    let pipeline = self.pipeline.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        pipeline.process(entry, settings).await
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if stop_when_idle && in_flight.is_empty() {
                        break;
                    }
                    reporter.report(OrchestratorEvent::Idle);
                    tokio::select! {
                        () = cancel_token.cancelled() => break,
                        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                            finished += reap(joined, reporter);
                        }
                        () = tokio::time::sleep(config.idle_poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to claim frontier entry");
                    tokio::select! {
                        () = tokio::time::sleep(config.idle_poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        reporter.report(OrchestratorEvent::ShuttingDown {
            in_flight: in_flight.len(),
        });
        while let Some(joined) = in_flight.join_next().await {
            finished += reap(joined, reporter);
        }

        // Anything still processing belongs to an aborted task.
        let mut released = 0;
        for job_id in self.jobs.all() {
            match self.pipeline.parts.frontier.release_processing(job_id).await {
                Ok(n) => released += n,
                Err(e) => tracing::error!(%job_id, error = %e, "Failed to release processing entries"),
            }
        }
        reporter.report(OrchestratorEvent::Stopped {
            entries_released: released,
        });

        Ok(finished)
    }

    async fn claim_round_robin(&self) -> Result<Option<(FrontierEntry, ItemSettings)>, AppError> {
        for job in self.jobs.rotation() {
            if let Some(entry) = self.pipeline.parts.frontier.claim_next(job.job_id).await? {
                return Ok(Some((entry, self.pipeline.settings_for(&job))));
            }
        }
        Ok(None)
    }
}

fn reap<R: OrchestratorReporter>(joined: Result<ItemReport, JoinError>, reporter: &R) -> usize {
    match joined {
        Ok(report) => {
            reporter.report(OrchestratorEvent::ItemFinished {
                entry: &report.entry,
                outcome: &report.outcome,
                document_id: report.document_id,
            });
            1
        }
        Err(e) => {
            let error = e.to_string();
            reporter.report(OrchestratorEvent::ItemAborted { error: &error });
            0
        }
    }
}

fn failure_outcome(error: &AppError) -> CompletionOutcome {
    match error.class() {
        ErrorClass::Transient => CompletionOutcome::TransientFailure {
            error: error.to_string(),
        },
        ErrorClass::Permanent => CompletionOutcome::PermanentFailure {
            error: error.to_string(),
        },
    }
}

fn skip_reason(outcome: &DedupOutcome) -> String {
    match outcome {
        DedupOutcome::New => "new".to_string(),
        DedupOutcome::ExactDuplicate { owner_id } => format!("exact duplicate of {owner_id}"),
        DedupOutcome::NearDuplicate { owner_id, distance } => {
            format!("near duplicate of {owner_id} (distance {distance})")
        }
    }
}

impl<Q, I, D, F, S> Pipeline<Q, I, D, F, S>
where
    Q: FrontierStore,
    I: FingerprintIndex,
    D: DeadLetterStore,
    F: Fetcher,
    S: DocumentStore,
{
    fn settings_for(&self, job: &JobConfig) -> ItemSettings {
        ItemSettings {
            source_lang: job
                .source_lang
                .clone()
                .unwrap_or_else(|| self.config.source_lang.clone()),
            target_lang: job
                .target_lang
                .clone()
                .unwrap_or_else(|| self.config.target_lang.clone()),
            tier: job.tier.unwrap_or(self.config.tier),
        }
    }

    /// Runs one item under its timeout and reports the outcome to the frontier.
    async fn process(&self, entry: FrontierEntry, settings: ItemSettings) -> ItemReport {
        let timeout = self.config.item_timeout;
        let (outcome, document_id) =
            match tokio::time::timeout(timeout, self.run_item(&entry, &settings)).await {
                Ok(Ok(done)) => done,
                Ok(Err(error)) => (failure_outcome(&error), None),
                Err(_) => (failure_outcome(&AppError::Timeout(timeout)), None),
            };

        if let Err(e) = self.parts.frontier.complete(&entry, &outcome).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to complete frontier entry");
        }

        let event = ItemEvent::new(&entry, &outcome, document_id);
        self.publish(ItemEvent::topic_for(&outcome), &event).await;

        ItemReport {
            entry,
            outcome,
            document_id,
        }
    }

    async fn run_item(
        &self,
        entry: &FrontierEntry,
        settings: &ItemSettings,
    ) -> Result<(CompletionOutcome, Option<Uuid>), AppError> {
        let parts = &self.parts;
        let url = Url::parse(&entry.normalized_url)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {e}", entry.normalized_url)))?;

        let mut robots_floor = Duration::ZERO;
        if self.config.respect_robots {
            let rules = self.robots_rules(entry, &url).await?;
            if !rules.is_allowed(&entry.normalized_url, &self.config.user_agent) {
                let error = AppError::RobotsDisallowed(entry.url.clone()).to_string();
                return Ok((CompletionOutcome::PermanentFailure { error }, None));
            }
            robots_floor = rules
                .crawl_delay(&self.config.user_agent)
                .unwrap_or_default();
        }

        if let Some(owner) = parts.fingerprints.check_url(&entry.normalized_url).await? {
            let reason = format!("url already ingested as {owner}");
            return Ok((CompletionOutcome::Skipped { reason }, None));
        }

        let fetch_started = parts.clock.now();
        let raw = parts.fetcher.fetch(&entry.url).await?;
        if self.adaptive_delay {
            let response_time = elapsed_between(fetch_started, parts.clock.now());
            parts
                .frontier
                .adapt_crawl_delay(&entry.domain, response_time, robots_floor)
                .await?;
        }

        let body = raw.body.trim();
        if body.is_empty() {
            return Err(AppError::MalformedContent(format!("{}: empty body", entry.url)));
        }

        // An earlier attempt may have saved the document and then stopped
        // before recording it.
        if let Some(existing) = parts.documents.find_by_entry(entry.id).await? {
            tracing::info!(
                entry_id = %entry.id,
                document_id = %existing.id,
                "Document saved by an earlier attempt, recording it"
            );
            let fingerprint =
                ContentFingerprint::compute(&existing.original_text, existing.id.to_string());
            self.record_fingerprint(entry, &fingerprint).await?;
            self.enqueue_links(entry, &raw.url, &raw.links).await;
            return Ok((CompletionOutcome::Done, Some(existing.id)));
        }

        let document_id = Uuid::new_v4();
        let fingerprint = ContentFingerprint::compute(body, document_id.to_string());
        let dedup = parts.fingerprints.check(&fingerprint).await?;
        if dedup.should_skip(parts.fingerprints.policy()) {
            let reason = skip_reason(&dedup);
            return Ok((CompletionOutcome::Skipped { reason }, None));
        }
        let near_duplicate_of = match dedup {
            DedupOutcome::NearDuplicate { owner_id, .. } => Some(owner_id),
            _ => None,
        };

        let translated = match parts
            .router
            .translate(body, &settings.source_lang, &settings.target_lang, settings.tier)
            .await
        {
            Ok(translated) => translated,
            Err(err @ RouterError::ProviderExhausted { .. }) => {
                let outcome = self.dead_letter(entry, settings, &err).await?;
                return Ok((outcome, None));
            }
            Err(err @ RouterError::NoChain(_)) => {
                let error = AppError::ConfigError(err.to_string()).to_string();
                return Ok((CompletionOutcome::PermanentFailure { error }, None));
            }
        };

        let document = Document {
            id: document_id,
            job_id: entry.job_id,
            entry_id: entry.id,
            url: raw.url.clone(),
            normalized_url: entry.normalized_url.clone(),
            content_hash: fingerprint.content_hash.to_hex(),
            simhash: fingerprint.simhash,
            original_text: body.to_string(),
            translated_text: translated.text,
            provider: translated.provider,
            source_lang: settings.source_lang.clone(),
            target_lang: settings.target_lang.clone(),
            tier: settings.tier,
            near_duplicate_of,
            created_at: parts.clock.now(),
        };
        let saved_id = parts.documents.save(&document).await?;

        let fingerprint = ContentFingerprint {
            owner_id: saved_id.to_string(),
            ..fingerprint
        };
        self.record_fingerprint(entry, &fingerprint).await?;

        self.enqueue_links(entry, &raw.url, &raw.links).await;

        Ok((CompletionOutcome::Done, Some(saved_id)))
    }

    /// Marks the content and the URL as ingested by `fingerprint.owner_id`.
    async fn record_fingerprint(
        &self,
        entry: &FrontierEntry,
        fingerprint: &ContentFingerprint,
    ) -> Result<(), AppError> {
        let fingerprints = &self.parts.fingerprints;
        if !fingerprints.record(fingerprint).await? {
            tracing::debug!(
                entry_id = %entry.id,
                hash = %fingerprint.content_hash,
                "Content hash was recorded by a concurrent item"
            );
        }
        fingerprints
            .record_url(&entry.normalized_url, &fingerprint.owner_id)
            .await?;
        Ok(())
    }

    /// Cached robots.txt for the entry's domain, refetched once per TTL.
    /// A failed fetch allows everything.
    async fn robots_rules(&self, entry: &FrontierEntry, url: &Url) -> Result<RobotsRules, AppError> {
        let parts = &self.parts;
        let now = parts.clock.now();
        if let Some(state) = parts.frontier.domain_state(&entry.domain).await?
            && !state.robots_is_stale(now, self.config.robots_ttl)
        {
            return Ok(state.robots_rules());
        }

        let location = robots_url(url)?;
        let rules = match parts.fetcher.fetch(&location).await {
            Ok(raw) => RobotsRules::from_content(raw.body),
            Err(e) => {
                tracing::debug!(domain = %entry.domain, error = %e, "robots.txt unavailable, allowing all");
                RobotsRules::allow_all()
            }
        };
        let delay = rules.crawl_delay(&self.config.user_agent);
        parts
            .frontier
            .record_robots(&entry.domain, rules.content(), delay)
            .await?;
        Ok(rules)
    }

    async fn dead_letter(
        &self,
        entry: &FrontierEntry,
        settings: &ItemSettings,
        err: &RouterError,
    ) -> Result<CompletionOutcome, AppError> {
        let parts = &self.parts;
        let now = parts.clock.now();
        let first_attempted_at = err.attempts().first().map_or(now, |a| a.at);
        let payload = serde_json::json!({
            "entry_id": entry.id,
            "url": entry.url,
            "normalized_url": entry.normalized_url,
            "depth": entry.depth,
            "source_lang": settings.source_lang,
            "target_lang": settings.target_lang,
            "tier": settings.tier,
            "attempts": err.attempts(),
        });
        let reason = err.to_string();
        let dead = DeadLetterEntry::new(
            Some(entry.job_id),
            payload,
            reason.clone(),
            err.invoked_attempts(),
            first_attempted_at,
            now,
        );
        parts.dead_letters.push(&dead).await?;
        tracing::warn!(
            job_id = %entry.job_id,
            url = %entry.url,
            attempts = dead.attempt_count,
            "Item dead-lettered"
        );
        self.publish(TOPIC_DEAD_LETTER, &dead).await;
        Ok(CompletionOutcome::DeadLettered { reason })
    }

    /// Enqueues discovered links one level deeper, each scored from the
    /// parent's priority and its own shape. Failures only skip the link.
    async fn enqueue_links(&self, entry: &FrontierEntry, base: &str, links: &[String]) {
        if links.is_empty() {
            return;
        }
        let Ok(base) = Url::parse(base).or_else(|_| Url::parse(&entry.url)) else {
            return;
        };
        let depth = entry.depth + 1;
        let mut inserted = 0usize;

        for link in links {
            let candidate = match base.join(link) {
                Ok(resolved) => NewFrontierEntry::new(entry.job_id, resolved.as_str()),
                Err(e) => Err(AppError::InvalidUrl(format!("{link}: {e}"))),
            };
            let candidate = match candidate {
                Ok(c) => {
                    let priority =
                        self.config
                            .priority
                            .child(&c.normalized_url, depth, entry.priority);
                    c.with_depth(depth)
                        .with_priority(priority)
                        .with_parent(entry.url.clone())
                }
                Err(e) => {
                    tracing::debug!(%link, error = %e, "Skipping link");
                    continue;
                }
            };
            match self.parts.frontier.enqueue(candidate).await {
                Ok(outcome) if outcome.is_inserted() => inserted += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(%link, error = %e, "Failed to enqueue link"),
            }
        }
        tracing::debug!(entry_id = %entry.id, found = links.len(), %inserted, "Links enqueued");
    }

    async fn publish<T: Serialize>(&self, topic: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(%topic, error = %e, "Failed to encode event");
                return;
            }
        };
        let message = EventMessage::new(payload, self.parts.clock.now());
        if let Err(e) = self.parts.events.publish(topic, message).await {
            tracing::warn!(%topic, error = %e, "Failed to publish event");
        }
    }
}
