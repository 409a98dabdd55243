//! Library-level operational surface.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::events::EventBus;
use crate::fingerprint::{FingerprintIndex, FingerprintStore, MemoryFingerprintIndex};
use crate::frontier::{EnqueueOutcome, FrontierStore, MemoryFrontier, NewFrontierEntry};
use crate::job::{JobConfig, JobId, JobStatusCounts};
use crate::orchestrator::{Collaborators, Orchestrator, OrchestratorReporter, TracingReporter};
use crate::reliability::{DeadLetterEntry, DeadLetterStore, MemoryDeadLetterQueue, ProviderGuards};
use crate::router::{ProviderClient, TranslationRouter};
use crate::traits::{DocumentStore, Fetcher};

/// Builds the router for `config` with every given provider registered.
pub fn build_router(
    config: &EngineConfig,
    providers: Vec<Arc<dyn ProviderClient>>,
    clock: SharedClock,
) -> TranslationRouter {
    let guards = ProviderGuards::new(config.reliability.clone(), clock.clone());
    let mut router = TranslationRouter::new(config.router.clone(), guards, clock);
    for provider in providers {
        router.register_provider(provider);
    }
    router
}

/// Result of [`IngestionService::requeue_dead_letters`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadLetterRequeue {
    /// Frontier entries put back to pending.
    pub requeued: Vec<Uuid>,
    /// Dead letters whose entry could not be re-queued; pushed back to the queue.
    pub kept: usize,
}

/// Starts, feeds, pauses and reports on ingestion jobs.
pub struct IngestionService<Q, I, D, F, S> {
    orchestrator: Orchestrator<Q, I, D, F, S>,
    frontier: Q,
    dead_letters: D,
}

impl<F, S> IngestionService<MemoryFrontier, MemoryFingerprintIndex, MemoryDeadLetterQueue, F, S>
where
    F: Fetcher + 'static,
    S: DocumentStore + 'static,
{
    /// Single-process wiring with in-memory frontier, index and dead letters.
    pub fn in_memory(
        config: EngineConfig,
        fetcher: F,
        documents: S,
        providers: Vec<Arc<dyn ProviderClient>>,
        events: Arc<dyn EventBus>,
        clock: SharedClock,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let index = MemoryFingerprintIndex::new(config.fingerprint.near_duplicate_distance);
        let parts = Collaborators {
            frontier: MemoryFrontier::new(config.frontier.clone(), clock.clone()),
            fingerprints: FingerprintStore::new(index, config.fingerprint.clone()),
            dead_letters: MemoryDeadLetterQueue::new(),
            fetcher,
            documents,
            router: Arc::new(build_router(&config, providers, clock.clone())),
            events,
            clock,
        };
        Self::new(&config, parts)
    }
}

impl<Q, I, D, F, S> IngestionService<Q, I, D, F, S>
where
    Q: FrontierStore + 'static,
    I: FingerprintIndex + 'static,
    D: DeadLetterStore + 'static,
    F: Fetcher + 'static,
    S: DocumentStore + 'static,
{
    pub fn new(config: &EngineConfig, parts: Collaborators<Q, I, D, F, S>) -> Result<Self, AppError> {
        config.validate()?;
        let frontier = parts.frontier.clone();
        let dead_letters = parts.dead_letters.clone();
        Ok(Self {
            orchestrator: Orchestrator::new(parts, config.orchestrator.clone(), &config.frontier),
            frontier,
            dead_letters,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator<Q, I, D, F, S> {
        &self.orchestrator
    }

    /// Rebuilds the fingerprint pre-filters from the persisted index.
    pub async fn warm(&self) -> Result<usize, AppError> {
        self.orchestrator.collaborators().fingerprints.warm().await
    }

    pub async fn start_job(&self, config: JobConfig) -> Result<JobId, AppError> {
        let job_id = config.job_id;
        self.frontier.register_job(&config).await?;
        tracing::info!(
            %job_id,
            max_pages = config.max_pages,
            max_depth = config.max_depth,
            "Job started"
        );
        self.orchestrator.add_job(config);
        Ok(job_id)
    }

    /// Enqueues seed URLs at depth 0 with seed priority. Returns how many
    /// were inserted; malformed URLs are skipped with a warning.
    pub async fn enqueue_seeds<U: AsRef<str>>(&self, job_id: JobId, urls: &[U]) -> Result<usize, AppError> {
        self.ensure_known(job_id)?;
        let weights = &self.orchestrator.config().priority;
        let mut inserted = 0;
        for url in urls {
            let url = url.as_ref();
            let entry = match NewFrontierEntry::new(job_id, url) {
                Ok(entry) => {
                    let priority = weights.seed(&entry.normalized_url);
                    entry.with_priority(priority)
                }
                Err(e) => {
                    tracing::warn!(%job_id, %url, error = %e, "Rejected seed URL");
                    continue;
                }
            };
            if self.frontier.enqueue(entry).await?.is_inserted() {
                inserted += 1;
            }
        }
        tracing::info!(%job_id, submitted = urls.len(), %inserted, "Seeds enqueued");
        Ok(inserted)
    }

    /// Enqueues a single prepared entry and reports exactly what happened.
    pub async fn enqueue(&self, entry: NewFrontierEntry) -> Result<EnqueueOutcome, AppError> {
        self.ensure_known(entry.job_id)?;
        self.frontier.enqueue(entry).await
    }

    pub fn pause_job(&self, job_id: JobId) -> Result<(), AppError> {
        self.orchestrator.pause(job_id)
    }

    pub fn resume_job(&self, job_id: JobId) -> Result<(), AppError> {
        self.orchestrator.resume(job_id)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusCounts, AppError> {
        let counts = self.frontier.status_counts(job_id).await?;
        let dead_lettered = self.dead_letters.count_for_job(job_id).await?;
        Ok(JobStatusCounts::from_frontier(counts, dead_lettered))
    }

    /// Removes and returns up to `limit` dead letters, oldest first.
    pub async fn drain_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, AppError> {
        let drained = self.dead_letters.drain(limit).await?;
        tracing::info!(count = drained.len(), "Dead letters drained");
        Ok(drained)
    }

    /// Takes up to `limit` dead letters, oldest first, and puts their
    /// frontier entries back to pending with a fresh retry budget.
    pub async fn requeue_dead_letters(&self, limit: usize) -> Result<DeadLetterRequeue, AppError> {
        let mut drained = self.dead_letters.drain(limit).await?.into_iter();
        let mut summary = DeadLetterRequeue::default();

        while let Some(dead) = drained.next() {
            match self.requeue_entry_of(&dead).await {
                Ok(Some(entry_id)) => summary.requeued.push(entry_id),
                Ok(None) => {
                    self.dead_letters.push(&dead).await?;
                    summary.kept += 1;
                }
                Err(e) => {
                    for remaining in std::iter::once(dead).chain(drained) {
                        self.dead_letters.push(&remaining).await?;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            requeued = summary.requeued.len(),
            kept = summary.kept,
            "Dead letters re-queued"
        );
        Ok(summary)
    }

    async fn requeue_entry_of(&self, dead: &DeadLetterEntry) -> Result<Option<Uuid>, AppError> {
        let entry_id = dead
            .original_payload
            .get("entry_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok());
        let Some(entry_id) = entry_id else {
            tracing::warn!(dead_letter_id = %dead.id, "Dead letter has no frontier entry");
            return Ok(None);
        };
        if self.frontier.requeue(entry_id).await? {
            Ok(Some(entry_id))
        } else {
            tracing::warn!(
                dead_letter_id = %dead.id,
                %entry_id,
                "Frontier entry is not failed, keeping dead letter"
            );
            Ok(None)
        }
    }

    /// Drives the orchestrator until `cancel_token` fires.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<usize, AppError> {
        self.orchestrator.run(cancel_token, &TracingReporter).await
    }

    pub async fn run_with_reporter<R: OrchestratorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<usize, AppError> {
        self.orchestrator.run(cancel_token, reporter).await
    }

    /// Processes until nothing is claimable and nothing is in flight.
    pub async fn run_until_idle(&self, cancel_token: CancellationToken) -> Result<usize, AppError> {
        self.orchestrator
            .run_until_idle(cancel_token, &TracingReporter)
            .await
    }

    fn ensure_known(&self, job_id: JobId) -> Result<(), AppError> {
        match self.orchestrator.is_paused(job_id) {
            Some(_) => Ok(()),
            None => Err(AppError::UnknownJob(job_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::{EventMessage, ItemEvent, MemoryEventBus, TOPIC_COMPLETED, TOPIC_DEAD_LETTER};
    use crate::router::{RouterConfig, Tier};
    use crate::testutil::{MockDocumentStore, MockFetcher, MockProvider};

    type MemoryService = IngestionService<
        MemoryFrontier,
        MemoryFingerprintIndex,
        MemoryDeadLetterQueue,
        MockFetcher,
        MockDocumentStore,
    >;

    fn service(
        config: EngineConfig,
        fetcher: MockFetcher,
        documents: MockDocumentStore,
        providers: Vec<Arc<dyn ProviderClient>>,
        events: Arc<MemoryEventBus>,
        clock: &ManualClock,
    ) -> MemoryService {
        IngestionService::in_memory(config, fetcher, documents, providers, events, clock.shared())
            .unwrap()
    }

    fn config(tier: Tier) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.orchestrator.source_lang = "en".into();
        config.orchestrator.target_lang = "es".into();
        config.orchestrator.tier = tier;
        config.orchestrator.idle_poll_interval = Duration::from_millis(5);
        config.fingerprint.bloom_capacity = 10_000;
        config
    }

    #[tokio::test]
    async fn test_seed_to_translated_document() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hello");
        let documents = MockDocumentStore::new();
        let claude = Arc::new(MockProvider::translating("claude", &[("hello", "hola")]));
        let events = Arc::new(MemoryEventBus::new());
        let service = service(
            config(Tier::Quality),
            fetcher,
            documents.clone(),
            vec![claude.clone() as Arc<dyn ProviderClient>],
            events.clone(),
            &clock,
        );

        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        assert_eq!(
            service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap(),
            1
        );

        // Claimable immediately: the domain is unseen and unblocked.
        let entry = service
            .orchestrator()
            .collaborators()
            .frontier
            .claim_next(job_id)
            .await
            .unwrap()
            .unwrap();
        // Seed bonus, one path segment, https.
        assert_eq!(entry.priority, 1003.0);
        assert_eq!(entry.depth, 0);
        service
            .orchestrator()
            .collaborators()
            .frontier
            .release_processing(job_id)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));

        service.run_until_idle(CancellationToken::new()).await.unwrap();

        let saved = documents.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].original_text, "hello");
        assert_eq!(saved[0].translated_text, "hola");
        assert_eq!(saved[0].tier, Tier::Quality);
        assert_eq!(claude.calls(), 1);

        let status = service.job_status(job_id).await.unwrap();
        assert_eq!(status.done, 1);
        assert!(status.is_settled());

        let event: ItemEvent = events.try_consume(TOPIC_COMPLETED).unwrap().decode().unwrap();
        assert_eq!(event.outcome, "done");
        assert_eq!(event.document_id, Some(saved[0].id));

        // Same normalized URL, same job: rejected at insert.
        assert_eq!(
            service.enqueue_seeds(job_id, &["https://X.test/p1#top"]).await.unwrap(),
            0
        );
        let again = NewFrontierEntry::new(job_id, "https://x.test/p1/").unwrap();
        assert_eq!(service.enqueue(again).await.unwrap(), EnqueueOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_always_failing_provider_is_dead_lettered() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hello");
        let mut config = config(Tier::Volume);
        config.router = RouterConfig::default().with_chain(Tier::Volume, &["azure"]);
        let azure = Arc::new(MockProvider::failing("azure", 503));
        let events = Arc::new(MemoryEventBus::new());
        let service = service(
            config.clone(),
            fetcher,
            MockDocumentStore::new(),
            vec![azure.clone() as Arc<dyn ProviderClient>],
            events.clone(),
            &clock,
        );

        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();

        let max_attempts = config.reliability.retry.max_attempts;
        assert_eq!(azure.calls(), max_attempts as usize);
        // Deterministic backoff through the injected clock.
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );

        let status = service.job_status(job_id).await.unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.dead_lettered, 1);

        let published: EventMessage = events.try_consume(TOPIC_DEAD_LETTER).unwrap();
        let announced: DeadLetterEntry = published.decode().unwrap();

        let drained = service.drain_dead_letters(10).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].attempt_count, max_attempts);
        assert!(drained[0].failure_reason.starts_with("ProviderExhausted"));
        assert_eq!(drained[0].original_payload["url"], "https://x.test/p1");
        assert_eq!(announced.id, drained[0].id);
        assert_eq!(service.job_status(job_id).await.unwrap().dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_dead_letters_requeued_and_reprocessed() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hello");
        let documents = MockDocumentStore::new();
        let mut config = config(Tier::Volume);
        config.router = RouterConfig::default().with_chain(Tier::Volume, &["azure"]);
        let max_attempts = config.reliability.retry.max_attempts;
        let azure = Arc::new(MockProvider::flaky(
            "azure",
            max_attempts,
            503,
            &[("hello", "hola")],
        ));
        let service = service(
            config.clone(),
            fetcher,
            documents.clone(),
            vec![azure.clone() as Arc<dyn ProviderClient>],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );

        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();
        assert_eq!(service.job_status(job_id).await.unwrap().dead_lettered, 1);
        assert!(documents.saved().is_empty());

        let summary = service.requeue_dead_letters(10).await.unwrap();
        assert_eq!(summary.requeued.len(), 1);
        assert_eq!(summary.kept, 0);
        let status = service.job_status(job_id).await.unwrap();
        assert_eq!(status.dead_lettered, 0);
        assert_eq!(status.failed, 0);
        assert_eq!(status.queued, 1);

        // Past the breaker cooldown, the half-open trial succeeds.
        clock.advance(config.reliability.breaker.cooldown);
        service.run_until_idle(CancellationToken::new()).await.unwrap();

        let saved = documents.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].translated_text, "hola");
        assert_eq!(saved[0].entry_id, summary.requeued[0]);
        assert_eq!(service.job_status(job_id).await.unwrap().done, 1);
    }

    #[tokio::test]
    async fn test_requeue_keeps_dead_letters_without_failed_entry() {
        let clock = ManualClock::epoch();
        let service = service(
            config(Tier::Quality),
            MockFetcher::new(),
            MockDocumentStore::new(),
            vec![],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );
        let dead = DeadLetterEntry::new(
            None,
            serde_json::json!({"entry_id": Uuid::new_v4()}),
            "ProviderExhausted",
            3,
            clock.now(),
            clock.now(),
        );
        let orphan = DeadLetterEntry::new(
            None,
            serde_json::json!({"url": "https://x.test/"}),
            "ProviderExhausted",
            3,
            clock.now(),
            clock.now(),
        );
        service.dead_letters.push(&dead).await.unwrap();
        service.dead_letters.push(&orphan).await.unwrap();

        let summary = service.requeue_dead_letters(10).await.unwrap();

        assert!(summary.requeued.is_empty());
        assert_eq!(summary.kept, 2);
        assert_eq!(service.dead_letters.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider_in_tier() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hello");
        let documents = MockDocumentStore::new();
        let mut config = config(Tier::Balanced);
        config.router = RouterConfig::default().with_chain(Tier::Balanced, &["google", "azure"]);
        let google = Arc::new(MockProvider::failing("google", 400));
        let azure = Arc::new(MockProvider::translating("azure", &[("hello", "hola")]));
        let service = service(
            config,
            fetcher,
            documents.clone(),
            vec![google.clone() as Arc<dyn ProviderClient>, azure.clone()],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );

        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();

        assert_eq!(google.calls(), 1);
        assert_eq!(documents.saved()[0].provider, "azure");
    }

    #[tokio::test]
    async fn test_job_overrides_languages_and_tier() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hallo");
        let documents = MockDocumentStore::new();
        let mut config = config(Tier::Quality);
        config.router = RouterConfig::default()
            .with_chain(Tier::Quality, &["claude"])
            .with_chain(Tier::Volume, &["azure"]);
        let azure = Arc::new(MockProvider::translating("azure", &[("hallo", "hello")]));
        let service = service(
            config,
            fetcher,
            documents.clone(),
            vec![azure as Arc<dyn ProviderClient>],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );

        let job = JobConfig::new().with_languages("de", "en").with_tier(Tier::Volume);
        let job_id = service.start_job(job).await.unwrap();
        service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();

        let doc = &documents.saved()[0];
        assert_eq!(doc.source_lang, "de");
        assert_eq!(doc.translated_text, "hello");
        assert_eq!(doc.tier, Tier::Volume);
    }

    #[tokio::test]
    async fn test_pause_holds_entries_until_resume() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new().with_page("https://x.test/p1", "hello");
        let claude = Arc::new(MockProvider::translating("claude", &[]));
        let service = service(
            config(Tier::Quality),
            fetcher,
            MockDocumentStore::new(),
            vec![claude as Arc<dyn ProviderClient>],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );

        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        service.enqueue_seeds(job_id, &["https://x.test/p1"]).await.unwrap();
        service.pause_job(job_id).unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();
        assert_eq!(service.job_status(job_id).await.unwrap().queued, 1);

        service.resume_job(job_id).unwrap();
        service.run_until_idle(CancellationToken::new()).await.unwrap();
        let status = service.job_status(job_id).await.unwrap();
        assert_eq!(status.queued, 0);
        assert_eq!(status.done, 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let clock = ManualClock::epoch();
        let fetcher = MockFetcher::new()
            .with_page("https://a.test/1", "first page")
            .with_page("https://b.test/2", "second page");
        let claude = Arc::new(MockProvider::translating("claude", &[]));
        let service = service(
            config(Tier::Quality),
            fetcher,
            MockDocumentStore::new(),
            vec![claude as Arc<dyn ProviderClient>],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );
        let job_id = service.start_job(JobConfig::new()).await.unwrap();
        service
            .enqueue_seeds(job_id, &["https://a.test/1", "https://b.test/2", "not a url"])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let (finished, ()) = tokio::join!(service.run(cancel.clone()), async {
            for _ in 0..400 {
                if service.job_status(job_id).await.unwrap().is_settled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        });

        assert_eq!(finished.unwrap(), 2);
        assert_eq!(service.job_status(job_id).await.unwrap().done, 2);
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let clock = ManualClock::epoch();
        let service = service(
            config(Tier::Quality),
            MockFetcher::new(),
            MockDocumentStore::new(),
            vec![],
            Arc::new(MemoryEventBus::new()),
            &clock,
        );
        let job_id = uuid::Uuid::new_v4();

        assert!(matches!(
            service.enqueue_seeds(job_id, &["https://x.test/"]).await,
            Err(AppError::UnknownJob(_))
        ));
        assert!(service.pause_job(job_id).is_err());
        assert!(service.job_status(job_id).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = config(Tier::Quality);
        config.orchestrator.max_concurrency = 0;
        let result = IngestionService::in_memory(
            config,
            MockFetcher::new(),
            MockDocumentStore::new(),
            vec![],
            Arc::new(MemoryEventBus::new()),
            ManualClock::epoch().shared(),
        );
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
