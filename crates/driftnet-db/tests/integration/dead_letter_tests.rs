use std::collections::HashSet;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use driftnet_core::reliability::{DeadLetterEntry, DeadLetterStore};

use crate::integration::common::setup_test_db;

fn entry(job_id: Option<Uuid>, reason: &str) -> DeadLetterEntry {
    let now = Utc::now();
    DeadLetterEntry::new(
        job_id,
        json!({"url": "https://x.test/p1", "depth": 0}),
        reason,
        5,
        now - Duration::seconds(30),
        now,
    )
}

#[tokio::test]
async fn push_and_list_preserve_fields_and_order() {
    let (db, _container) = setup_test_db().await;
    let dlq = db.dead_letter_repo();
    let job = Uuid::new_v4();

    let first = entry(Some(job), "ProviderExhausted: all providers failed");
    dlq.push(&first).await.unwrap();
    dlq.push(&entry(None, "second")).await.unwrap();

    let listed = dlq.list(10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[0].job_id, Some(job));
    assert_eq!(listed[0].original_payload, first.original_payload);
    assert_eq!(listed[0].attempt_count, 5);
    assert_eq!(
        listed[0].first_attempted_at.timestamp_micros(),
        first.first_attempted_at.timestamp_micros()
    );
    assert_eq!(listed[1].failure_reason, "second");

    // Listing does not remove.
    assert_eq!(dlq.count().await.unwrap(), 2);
    assert_eq!(dlq.count_for_job(job).await.unwrap(), 1);
}

#[tokio::test]
async fn drain_removes_oldest_first() {
    let (db, _container) = setup_test_db().await;
    let dlq = db.dead_letter_repo();
    for reason in ["a", "b", "c"] {
        dlq.push(&entry(None, reason)).await.unwrap();
    }

    let drained = dlq.drain(2).await.unwrap();
    let reasons: Vec<_> = drained.iter().map(|e| e.failure_reason.as_str()).collect();
    assert_eq!(reasons, vec!["a", "b"]);
    assert_eq!(dlq.count().await.unwrap(), 1);

    assert_eq!(dlq.drain(10).await.unwrap()[0].failure_reason, "c");
    assert!(dlq.drain(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_drains_are_disjoint() {
    let (db, _container) = setup_test_db().await;
    let dlq = db.dead_letter_repo();
    for n in 0..20 {
        dlq.push(&entry(None, &format!("item-{n}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let dlq = dlq.clone();
        handles.push(tokio::spawn(async move { dlq.drain(5).await }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for drained in handle.await.unwrap().unwrap() {
            assert!(seen.insert(drained.id), "entry drained twice");
        }
    }
    assert_eq!(seen.len() as u64 + dlq.count().await.unwrap(), 20);
}
