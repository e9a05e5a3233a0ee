// Hotlink mappings: registration rules and shared lifecycle with the file
// record.

mod common;

use time::OffsetDateTime;

use common::{create_file, harness};
use kapsel::auth;

#[tokio::test]
async fn register_and_resolve_roundtrip() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    let hotlink_id = h
        .hotlinks()
        .register(&record.id)
        .await
        .unwrap()
        .expect("unprotected file should get a hotlink");

    let resolved = h.hotlinks().resolve(&hotlink_id).await.unwrap();
    assert_eq!(resolved.as_deref(), Some(record.id.as_str()));
}

#[tokio::test]
async fn register_is_idempotent_per_file() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    let first = h.hotlinks().register(&record.id).await.unwrap().unwrap();
    let second = h.hotlinks().register(&record.id).await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn protected_files_are_never_hotlinked() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password("open sesame").await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    assert!(h.hotlinks().register(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn protecting_a_file_drops_its_hotlink() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    let hotlink_id = h.hotlinks().register(&record.id).await.unwrap().unwrap();

    let hash = auth::hash_password("open sesame").await.unwrap();
    assert!(h
        .files()
        .update_password(&record.id, Some(&hash))
        .await
        .unwrap());

    assert!(h.hotlinks().resolve(&hotlink_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unregister_detaches_the_mapping() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    let hotlink_id = h.hotlinks().register(&record.id).await.unwrap().unwrap();
    h.hotlinks().unregister(&record.id).await.unwrap();

    assert!(h.hotlinks().resolve(&hotlink_id).await.unwrap().is_none());
    // The file itself is untouched.
    assert!(h.files().get(&record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn deleting_the_file_removes_the_mapping() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    let hotlink_id = h.hotlinks().register(&record.id).await.unwrap().unwrap();

    let stored_path = h.files().delete(&record.id).await.unwrap();
    assert_eq!(stored_path.as_deref(), Some("2026/08/06/test-object"));

    assert!(h.hotlinks().resolve(&hotlink_id).await.unwrap().is_none());

    // Deletion is idempotent.
    assert!(h.files().delete(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_hotlinks_resolve_to_nothing() {
    let h = harness().await;

    assert!(h.hotlinks().resolve("never-registered").await.unwrap().is_none());
    assert!(h.hotlinks().resolve("").await.unwrap().is_none());
}
