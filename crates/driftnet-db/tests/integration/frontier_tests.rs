use std::collections::HashSet;
use std::time::Duration;

use driftnet_core::clock::{Clock, ManualClock, add_duration};
use driftnet_core::frontier::{
    CompletionOutcome, EnqueueOutcome, EntryStatus, FrontierConfig, FrontierStore, NewFrontierEntry,
};
use driftnet_core::job::JobConfig;
use driftnet_core::router::Tier;
use driftnet_core::AppError;
use driftnet_db::PgFrontierRepository;

use crate::integration::common::setup_test_db;

fn entry(job: uuid::Uuid, url: &str) -> NewFrontierEntry {
    NewFrontierEntry::new(job, url).unwrap()
}

async fn repo_with_job(
    db: &driftnet_db::Database,
    config: FrontierConfig,
    job: JobConfig,
) -> (PgFrontierRepository, ManualClock) {
    let clock = ManualClock::epoch();
    let repo = db.frontier_repo(config, clock.shared());
    repo.register_job(&job).await.unwrap();
    (repo, clock)
}

#[tokio::test]
async fn enqueue_rejects_duplicates_and_enforces_bounds() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new().with_max_pages(2).with_max_depth(1);
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    let first = repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();
    assert!(first.is_inserted());

    // Same normalized URL.
    let dup = repo
        .enqueue(entry(job.job_id, "https://X.test/p1/#top"))
        .await
        .unwrap();
    assert_eq!(dup, EnqueueOutcome::Duplicate);

    let deep = repo
        .enqueue(entry(job.job_id, "https://x.test/deep").with_depth(2))
        .await
        .unwrap();
    assert_eq!(deep, EnqueueOutcome::TooDeep);

    repo.enqueue(entry(job.job_id, "https://x.test/p2")).await.unwrap();
    let over = repo.enqueue(entry(job.job_id, "https://x.test/p3")).await.unwrap();
    assert_eq!(over, EnqueueOutcome::LimitReached);

    let counts = repo.status_counts(job.job_id).await.unwrap();
    assert_eq!(counts.pending, 2);
}

#[tokio::test]
async fn unknown_job_is_rejected() {
    let (db, _container) = setup_test_db().await;
    let repo = db.frontier_repo(FrontierConfig::default(), ManualClock::epoch().shared());
    let job_id = uuid::Uuid::new_v4();

    let err = repo.enqueue(entry(job_id, "https://x.test")).await.unwrap_err();
    assert!(matches!(err, AppError::UnknownJob(id) if id == job_id));
    assert!(matches!(
        repo.claim_next(job_id).await.unwrap_err(),
        AppError::UnknownJob(_)
    ));
    assert!(matches!(
        repo.status_counts(job_id).await.unwrap_err(),
        AppError::UnknownJob(_)
    ));
}

#[tokio::test]
async fn register_job_persists_settings() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new()
        .with_max_pages(42)
        .with_languages("de", "en")
        .with_tier(Tier::Volume);
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    assert_eq!(repo.job(job.job_id).await.unwrap(), Some(job.clone()));

    // Re-registering updates the bounds in place.
    let widened = job.clone().with_max_pages(100);
    repo.register_job(&widened).await.unwrap();
    assert_eq!(repo.job(job.job_id).await.unwrap().unwrap().max_pages, 100);
}

#[tokio::test]
async fn claim_order_is_priority_then_depth_then_insertion() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    repo.enqueue(entry(job.job_id, "https://a.test/low").with_priority(0.1))
        .await
        .unwrap();
    repo.enqueue(entry(job.job_id, "https://b.test/deep").with_priority(0.9).with_depth(1))
        .await
        .unwrap();
    repo.enqueue(entry(job.job_id, "https://c.test/first").with_priority(0.9))
        .await
        .unwrap();
    repo.enqueue(entry(job.job_id, "https://d.test/second").with_priority(0.9))
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(claimed) = repo.claim_next(job.job_id).await.unwrap() {
        assert_eq!(claimed.status, EntryStatus::Processing);
        order.push(claimed.domain);
    }
    assert_eq!(order, vec!["c.test", "d.test", "b.test", "a.test"]);
}

#[tokio::test]
async fn politeness_gate_holds_domain_for_crawl_delay() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();
    repo.enqueue(entry(job.job_id, "https://x.test/p2")).await.unwrap();

    let first = repo.claim_next(job.job_id).await.unwrap().unwrap();
    assert_eq!(first.normalized_url, "https://x.test/p1");
    assert!(repo.claim_next(job.job_id).await.unwrap().is_none());

    let state = repo.domain_state("x.test").await.unwrap().unwrap();
    assert_eq!(state.last_crawl_at, Some(clock.now()));
    assert_eq!(state.crawl_delay, Duration::from_secs(1));

    clock.advance(Duration::from_millis(999));
    assert!(repo.claim_next(job.job_id).await.unwrap().is_none());
    clock.advance(Duration::from_millis(1));
    let second = repo.claim_next(job.job_id).await.unwrap().unwrap();
    assert_eq!(second.normalized_url, "https://x.test/p2");
}

#[tokio::test]
async fn transient_failures_requeue_then_fail_and_block_domain() {
    let (db, _container) = setup_test_db().await;
    let config = FrontierConfig {
        domain_error_threshold: 2,
        max_item_retries: 1,
        ..FrontierConfig::default()
    };
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, config, job.clone()).await;
    let transient = CompletionOutcome::TransientFailure {
        error: "HTTP 503".into(),
    };

    repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();

    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(&claimed, &transient).await.unwrap();
    let stored = repo.get_entry(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(
        stored.next_attempt_at,
        Some(add_duration(clock.now(), Duration::from_secs(4)))
    );

    // First retry waits 2s * 2^1.
    clock.advance(Duration::from_secs(3));
    assert!(repo.claim_next(job.job_id).await.unwrap().is_none());
    clock.advance(Duration::from_secs(1));
    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(&claimed, &transient).await.unwrap();
    let stored = repo.get_entry(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Failed);

    // Second consecutive error reaches the threshold: blocked for 2s * 2^2.
    let state = repo.domain_state("x.test").await.unwrap().unwrap();
    assert_eq!(state.consecutive_errors, 2);
    assert_eq!(
        state.blocked_until,
        Some(add_duration(clock.now(), Duration::from_secs(8)))
    );

    repo.enqueue(entry(job.job_id, "https://x.test/p2")).await.unwrap();
    clock.advance(Duration::from_secs(1));
    assert!(repo.claim_next(job.job_id).await.unwrap().is_none());

    clock.advance(Duration::from_secs(8));
    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(&claimed, &CompletionOutcome::Done).await.unwrap();

    let state = repo.domain_state("x.test").await.unwrap().unwrap();
    assert_eq!(state.consecutive_errors, 0);
    assert!(state.blocked_until.is_none());
}

#[tokio::test]
async fn transient_retries_back_off_exponentially() {
    let (db, _container) = setup_test_db().await;
    let config = FrontierConfig {
        domain_error_threshold: 100,
        max_item_retries: 5,
        ..FrontierConfig::default()
    };
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, config, job.clone()).await;
    let transient = CompletionOutcome::TransientFailure {
        error: "timeout".into(),
    };
    repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();

    for wait in [4, 8, 16] {
        let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
        repo.complete(&claimed, &transient).await.unwrap();

        clock.advance(Duration::from_secs(wait - 1));
        assert!(
            repo.claim_next(job.job_id).await.unwrap().is_none(),
            "reclaimed before {wait}s backoff"
        );
        clock.advance(Duration::from_secs(1));
    }

    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    assert_eq!(claimed.retry_count, 3);
}

#[tokio::test]
async fn requeue_restores_failed_entry() {
    let (db, _container) = setup_test_db().await;
    let config = FrontierConfig {
        max_item_retries: 0,
        ..FrontierConfig::default()
    };
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, config, job.clone()).await;
    repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();

    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    assert!(!repo.requeue(claimed.id).await.unwrap());
    repo.complete(
        &claimed,
        &CompletionOutcome::TransientFailure {
            error: "HTTP 503".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        repo.get_entry(claimed.id).await.unwrap().unwrap().status,
        EntryStatus::Failed
    );

    assert!(repo.requeue(claimed.id).await.unwrap());
    assert!(!repo.requeue(claimed.id).await.unwrap());
    assert!(!repo.requeue(uuid::Uuid::new_v4()).await.unwrap());

    let stored = repo.get_entry(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.last_error.is_none());
    assert!(stored.next_attempt_at.is_none());

    clock.advance(Duration::from_secs(1));
    let again = repo.claim_next(job.job_id).await.unwrap().unwrap();
    assert_eq!(again.id, claimed.id);
}

#[tokio::test]
async fn permanent_failure_and_skip_leave_domain_untouched() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    repo.enqueue(entry(job.job_id, "https://x.test/gone")).await.unwrap();
    repo.enqueue(entry(job.job_id, "https://x.test/dup")).await.unwrap();

    let gone = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(
        &gone,
        &CompletionOutcome::PermanentFailure {
            error: "HTTP 404".into(),
        },
    )
    .await
    .unwrap();

    clock.advance(Duration::from_secs(1));
    let dup = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(
        &dup,
        &CompletionOutcome::Skipped {
            reason: "exact duplicate".into(),
        },
    )
    .await
    .unwrap();

    let counts = repo.status_counts(job.job_id).await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.done, 1);
    assert_eq!(
        repo.domain_state("x.test").await.unwrap().unwrap().consecutive_errors,
        0
    );
}

#[tokio::test]
async fn completion_of_non_processing_entry_is_ignored() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    repo.enqueue(entry(job.job_id, "https://x.test/p1")).await.unwrap();
    let claimed = repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.complete(&claimed, &CompletionOutcome::Done).await.unwrap();
    repo.complete(
        &claimed,
        &CompletionOutcome::PermanentFailure {
            error: "late".into(),
        },
    )
    .await
    .unwrap();

    let stored = repo.get_entry(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Done);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn robots_and_adaptive_delay_are_persisted() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, clock) = repo_with_job(&db, FrontierConfig::default(), job).await;

    repo.record_robots(
        "x.test",
        "User-agent: *\nCrawl-delay: 7\n",
        Some(Duration::from_secs(7)),
    )
    .await
    .unwrap();
    let state = repo.domain_state("x.test").await.unwrap().unwrap();
    assert_eq!(state.crawl_delay, Duration::from_secs(7));
    assert_eq!(state.robots_txt_fetched_at, Some(clock.now()));
    assert!(state.robots_txt.unwrap().contains("Crawl-delay"));

    // 10 x 200ms = 2s, but never below the robots floor.
    repo.adapt_crawl_delay("x.test", Duration::from_millis(200), Duration::from_secs(7))
        .await
        .unwrap();
    assert_eq!(
        repo.domain_state("x.test").await.unwrap().unwrap().crawl_delay,
        Duration::from_secs(7)
    );

    repo.adapt_crawl_delay("y.test", Duration::from_millis(200), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(
        repo.domain_state("y.test").await.unwrap().unwrap().crawl_delay,
        Duration::from_secs(2)
    );
}

#[tokio::test]
async fn release_processing_returns_entries_to_pending() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    repo.enqueue(entry(job.job_id, "https://a.test/")).await.unwrap();
    repo.enqueue(entry(job.job_id, "https://b.test/")).await.unwrap();
    repo.claim_next(job.job_id).await.unwrap().unwrap();
    repo.claim_next(job.job_id).await.unwrap().unwrap();

    assert_eq!(repo.release_processing(job.job_id).await.unwrap(), 2);
    let counts = repo.status_counts(job.job_id).await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.processing, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_exclusive() {
    let (db, _container) = setup_test_db().await;
    let job = JobConfig::new();
    let (repo, _clock) = repo_with_job(&db, FrontierConfig::default(), job.clone()).await;

    // Two entries per domain: only one of each may be claimed.
    for domain in 0..6 {
        for page in 0..2 {
            repo.enqueue(entry(job.job_id, &format!("https://d{domain}.test/p{page}")))
                .await
                .unwrap();
        }
    }

    let mut handles = Vec::new();
    for _ in 0..12 {
        let repo = repo.clone();
        let job_id = job.job_id;
        handles.push(tokio::spawn(async move { repo.claim_next(job_id).await }));
    }

    let mut ids = HashSet::new();
    let mut domains = HashSet::new();
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap().unwrap() {
            assert!(ids.insert(claimed.id), "entry claimed twice");
            assert!(domains.insert(claimed.domain), "domain claimed twice within its delay");
        }
    }
    assert_eq!(ids.len(), 6);
}
