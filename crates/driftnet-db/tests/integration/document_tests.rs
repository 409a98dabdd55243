use chrono::{TimeZone, Utc};
use uuid::Uuid;

use driftnet_core::fingerprint::ContentFingerprint;
use driftnet_core::models::Document;
use driftnet_core::router::Tier;
use driftnet_core::traits::DocumentStore;

use crate::integration::common::setup_test_db;

fn document(job_id: Uuid, text: &str, created_secs: i64) -> Document {
    let fingerprint = ContentFingerprint::compute(text, "owner");
    Document {
        id: Uuid::new_v4(),
        job_id,
        entry_id: Uuid::new_v4(),
        url: "https://x.test/p1".into(),
        normalized_url: "https://x.test/p1".into(),
        content_hash: fingerprint.content_hash.to_hex(),
        simhash: fingerprint.simhash,
        original_text: text.into(),
        translated_text: format!("[es] {text}"),
        provider: "deepl".into(),
        source_lang: "en".into(),
        target_lang: "es".into(),
        tier: Tier::Balanced,
        near_duplicate_of: None,
        created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
    }
}

#[tokio::test]
async fn save_and_get_roundtrip() {
    let (db, _container) = setup_test_db().await;
    let repo = db.document_repo();
    let mut doc = document(Uuid::new_v4(), "hello world", 1_700_000_000);
    doc.simhash = u64::MAX - 3;
    doc.near_duplicate_of = Some("doc-0".into());
    doc.tier = Tier::Quality;

    let id = repo.save(&doc).await.unwrap();
    assert_eq!(id, doc.id);

    let loaded = repo.get(id).await.unwrap().unwrap();
    assert_eq!(loaded, doc);
    assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn saving_same_id_twice_fails() {
    let (db, _container) = setup_test_db().await;
    let repo = db.document_repo();
    let doc = document(Uuid::new_v4(), "hello", 1_700_000_000);

    repo.save(&doc).await.unwrap();
    assert!(repo.save(&doc).await.is_err());
}

#[tokio::test]
async fn list_for_job_newest_first() {
    let (db, _container) = setup_test_db().await;
    let repo = db.document_repo();
    let job = Uuid::new_v4();

    repo.save(&document(job, "older", 1_700_000_000)).await.unwrap();
    repo.save(&document(job, "newer", 1_700_000_100)).await.unwrap();
    repo.save(&document(Uuid::new_v4(), "other job", 1_700_000_200))
        .await
        .unwrap();

    let listed = repo.list_for_job(job, 10).await.unwrap();
    let texts: Vec<_> = listed.iter().map(|d| d.original_text.as_str()).collect();
    assert_eq!(texts, vec!["newer", "older"]);
    assert_eq!(repo.count_for_job(job).await.unwrap(), 2);
}

#[tokio::test]
async fn find_by_entry_returns_saved_document() {
    let (db, _container) = setup_test_db().await;
    let repo = db.document_repo();
    let doc = document(Uuid::new_v4(), "hello", 1_700_000_000);
    repo.save(&doc).await.unwrap();

    let found = repo.find_by_entry(doc.entry_id).await.unwrap().unwrap();
    assert_eq!(found.id, doc.id);
    assert!(repo.find_by_entry(Uuid::new_v4()).await.unwrap().is_none());
}
