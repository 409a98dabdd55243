use driftnet_core::fingerprint::{
    ContentFingerprint, ContentHash, DedupOutcome, FingerprintConfig, FingerprintIndex,
    FingerprintStore,
};

use crate::integration::common::setup_test_db;

fn fingerprint(text: &str, simhash: u64, owner: &str) -> ContentFingerprint {
    ContentFingerprint {
        content_hash: ContentHash::of(text.as_bytes()),
        simhash,
        owner_id: owner.into(),
    }
}

#[tokio::test]
async fn insert_is_unique_on_content_hash() {
    let (db, _container) = setup_test_db().await;
    let index = db.fingerprint_repo(6);

    assert!(index.insert(&fingerprint("a", 1, "doc-1")).await.unwrap());
    assert!(!index.insert(&fingerprint("a", 1, "doc-2")).await.unwrap());

    let owner = index.find_exact(&ContentHash::of(b"a")).await.unwrap();
    assert_eq!(owner.as_deref(), Some("doc-1"));
    assert!(index.find_exact(&ContentHash::of(b"b")).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_inserts_have_single_winner() {
    let (db, _container) = setup_test_db().await;
    let index = db.fingerprint_repo(6);

    let mut handles = Vec::new();
    for n in 0..8 {
        let index = index.clone();
        handles.push(tokio::spawn(async move {
            index.insert(&fingerprint("same", 42, &format!("doc-{n}"))).await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn find_near_through_bands() {
    let (db, _container) = setup_test_db().await;
    let index = db.fingerprint_repo(6);
    index.insert(&fingerprint("zero", 0, "doc-zero")).await.unwrap();
    // High bit set: stored as a negative BIGINT.
    let high = 0xF000_0000_0000_0000u64;
    index.insert(&fingerprint("high", high, "doc-high")).await.unwrap();

    let near = index.find_near(0b111, 6).await.unwrap().unwrap();
    assert_eq!(near.owner_id, "doc-zero");
    assert_eq!(near.distance, 3);

    let near = index.find_near(high | 1, 6).await.unwrap().unwrap();
    assert_eq!(near.owner_id, "doc-high");
    assert_eq!(near.simhash, high);
    assert_eq!(near.distance, 1);

    // Shares bands with "zero" but is too far for the requested distance.
    assert!(index.find_near(0b111, 2).await.unwrap().is_none());
    assert!(index.find_near(0x00FF_FF00_FF00_FF00, 6).await.unwrap().is_none());
}

#[tokio::test]
async fn find_near_beyond_band_distance_scans() {
    let (db, _container) = setup_test_db().await;
    let index = db.fingerprint_repo(2);
    index.insert(&fingerprint("zero", 0, "doc-zero")).await.unwrap();

    // Ten bits apart: no band match at distance 2, found by the scan.
    let probe = 0b11_1111_1111u64;
    let near = index.find_near(probe, 12).await.unwrap().unwrap();
    assert_eq!(near.owner_id, "doc-zero");
    assert_eq!(near.distance, 10);
    assert!(index.find_near(probe, 9).await.unwrap().is_none());
}

#[tokio::test]
async fn url_records_are_unique() {
    let (db, _container) = setup_test_db().await;
    let index = db.fingerprint_repo(6);
    let hash = ContentHash::of(b"https://x.test/p1");

    assert!(index.find_url(&hash).await.unwrap().is_none());
    assert!(index.insert_url(&hash, "doc-1").await.unwrap());
    assert!(!index.insert_url(&hash, "doc-2").await.unwrap());
    assert_eq!(index.find_url(&hash).await.unwrap().as_deref(), Some("doc-1"));
}

#[tokio::test]
async fn warm_store_recognizes_persisted_content() {
    let (db, _container) = setup_test_db().await;
    let config = FingerprintConfig {
        bloom_capacity: 1_000,
        ..FingerprintConfig::default()
    };

    let first = FingerprintStore::new(db.fingerprint_repo(config.near_duplicate_distance), config.clone());
    let recorded = ContentFingerprint::compute("the quick brown fox jumps over the lazy dog", "doc-1");
    first.record(&recorded).await.unwrap();
    first.record_url("https://x.test/fox", "doc-1").await.unwrap();

    // A fresh process starts with empty pre-filters and must warm them.
    let restarted =
        FingerprintStore::new(db.fingerprint_repo(config.near_duplicate_distance), config);
    assert_eq!(restarted.check(&recorded).await.unwrap(), DedupOutcome::New);
    assert_eq!(restarted.warm().await.unwrap(), 2);

    let again = ContentFingerprint::compute("the quick brown fox jumps over the lazy dog", "doc-2");
    assert_eq!(
        restarted.check(&again).await.unwrap(),
        DedupOutcome::ExactDuplicate {
            owner_id: "doc-1".into()
        }
    );
    assert_eq!(
        restarted.check_url("https://x.test/fox").await.unwrap().as_deref(),
        Some("doc-1")
    );
}
