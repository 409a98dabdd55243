use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use driftnet_core::clock::ManualClock;
use driftnet_core::config::EngineConfig;
use driftnet_core::events::{MemoryEventBus, TOPIC_COMPLETED, TOPIC_FAILED};
use driftnet_core::fingerprint::FingerprintStore;
use driftnet_core::job::JobConfig;
use driftnet_core::orchestrator::Collaborators;
use driftnet_core::router::{ProviderClient, Tier};
use driftnet_core::service::{IngestionService, build_router};
use driftnet_core::testutil::{MockFetcher, MockProvider};
use driftnet_db::{
    Database, PgDeadLetterRepository, PgDocumentRepository, PgFingerprintRepository,
    PgFrontierRepository,
};

use crate::integration::common::setup_test_db;

type PgService = IngestionService<
    PgFrontierRepository,
    PgFingerprintRepository,
    PgDeadLetterRepository,
    MockFetcher,
    PgDocumentRepository,
>;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.orchestrator.source_lang = "en".into();
    config.orchestrator.target_lang = "es".into();
    config.orchestrator.tier = Tier::Quality;
    config.orchestrator.idle_poll_interval = std::time::Duration::from_millis(5);
    config.fingerprint.bloom_capacity = 10_000;
    config
}

fn pg_service(
    db: &Database,
    fetcher: MockFetcher,
    provider: Arc<MockProvider>,
    events: Arc<MemoryEventBus>,
    clock: &ManualClock,
) -> PgService {
    let config = config();
    let parts = Collaborators {
        frontier: db.frontier_repo(config.frontier.clone(), clock.shared()),
        fingerprints: FingerprintStore::new(
            db.fingerprint_repo(config.fingerprint.near_duplicate_distance),
            config.fingerprint.clone(),
        ),
        dead_letters: db.dead_letter_repo(),
        fetcher,
        documents: db.document_repo(),
        router: Arc::new(build_router(
            &config,
            vec![provider as Arc<dyn ProviderClient>],
            clock.shared(),
        )),
        events,
        clock: clock.shared(),
    };
    IngestionService::new(&config, parts).unwrap()
}

#[tokio::test]
async fn job_runs_end_to_end_on_postgres() {
    let (db, _container) = setup_test_db().await;
    let clock = ManualClock::epoch();
    let fetcher = MockFetcher::new()
        .with_links("https://a.test/p1", "hello", &["https://b.test/p2"])
        .with_page("https://b.test/p2", "hello")
        .with_status("https://c.test/p3", 404);
    let claude = Arc::new(MockProvider::translating("claude", &[("hello", "hola")]));
    let events = Arc::new(MemoryEventBus::new());
    let service = pg_service(&db, fetcher, claude.clone(), events.clone(), &clock);

    let job_id = service.start_job(JobConfig::new()).await.unwrap();
    let seeded = service
        .enqueue_seeds(job_id, &["https://a.test/p1", "https://c.test/p3"])
        .await
        .unwrap();
    assert_eq!(seeded, 2);

    service.run_until_idle(CancellationToken::new()).await.unwrap();

    // p2 repeats p1's content and is skipped as an exact duplicate.
    let status = service.job_status(job_id).await.unwrap();
    assert_eq!(status.done, 2);
    assert_eq!(status.failed, 1);
    assert_eq!(status.dead_lettered, 0);
    assert!(status.is_settled());
    assert_eq!(claude.calls(), 1);
    assert_eq!(events.len(TOPIC_COMPLETED), 2);
    assert_eq!(events.len(TOPIC_FAILED), 1);

    let documents = db.document_repo().list_for_job(job_id, 10).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].translated_text, "hola");
    assert_eq!(documents[0].url, "https://a.test/p1");

    let stored_job = db
        .frontier_repo(config().frontier, clock.shared())
        .job(job_id)
        .await
        .unwrap();
    assert_eq!(stored_job.map(|j| j.max_pages), Some(JobConfig::default().max_pages));
}

#[tokio::test]
async fn restarted_service_warms_from_persisted_fingerprints() {
    let (db, _container) = setup_test_db().await;
    let clock = ManualClock::epoch();
    let claude = Arc::new(MockProvider::translating("claude", &[]));

    let first = pg_service(
        &db,
        MockFetcher::new().with_page("https://a.test/p1", "persisted body"),
        claude.clone(),
        Arc::new(MemoryEventBus::new()),
        &clock,
    );
    let job_id = first.start_job(JobConfig::new()).await.unwrap();
    first.enqueue_seeds(job_id, &["https://a.test/p1"]).await.unwrap();
    first.run_until_idle(CancellationToken::new()).await.unwrap();
    assert_eq!(claude.calls(), 1);

    // Same content under a new URL in a new job, served by a fresh process.
    let second = pg_service(
        &db,
        MockFetcher::new().with_page("https://b.test/copy", "persisted body"),
        claude.clone(),
        Arc::new(MemoryEventBus::new()),
        &clock,
    );
    assert_eq!(second.warm().await.unwrap(), 2);

    let job_id = second.start_job(JobConfig::new()).await.unwrap();
    second.enqueue_seeds(job_id, &["https://b.test/copy"]).await.unwrap();
    second.run_until_idle(CancellationToken::new()).await.unwrap();

    assert_eq!(claude.calls(), 1);
    let status = second.job_status(job_id).await.unwrap();
    assert_eq!(status.done, 1);
    assert_eq!(db.document_repo().count_for_job(job_id).await.unwrap(), 0);
}
