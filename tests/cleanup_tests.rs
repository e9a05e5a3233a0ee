// Background reaper: dead file records and sessions are removed, live ones
// survive.

mod common;

use time::{Duration, OffsetDateTime};

use common::{create_file, harness, SESSION_TTL};
use kapsel::app_state::AppState;
use kapsel::cleanup::run_cleanup_cycle;
use kapsel::config::AppConfig;

#[tokio::test]
async fn reaper_removes_dead_records_and_sessions() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();

    let past = (now - Duration::hours(2)).unix_timestamp();
    let future = (now + Duration::hours(2)).unix_timestamp();

    let time_expired = create_file(h.files(), past, Some(past), Some(3), None).await;
    let quota_expired = create_file(h.files(), past, None, Some(0), None).await;
    let live = create_file(h.files(), now.unix_timestamp(), Some(future), Some(3), None).await;

    let dead_session = h.sessions().create(now - SESSION_TTL * 2).await.unwrap();
    let live_session = h.sessions().create(now).await.unwrap();

    let storage_root = tempfile::TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.storage.root = storage_root.path().to_path_buf();

    let state = AppState::new(h.pool.clone(), config, h.access.clone());
    run_cleanup_cycle(&state).await.unwrap();

    // Dead records are gone even though their bytes were already absent on
    // disk; the live record is untouched.
    assert!(h.files().get(&time_expired.id).await.unwrap().is_none());
    assert!(h.files().get(&quota_expired.id).await.unwrap().is_none());
    assert!(h.files().get(&live.id).await.unwrap().is_some());

    assert!(h
        .sessions()
        .validate(&dead_session.token, now)
        .await
        .unwrap()
        .is_none());
    assert!(h
        .sessions()
        .validate(&live_session.token, now)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn reaper_is_a_no_op_on_a_clean_store() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let future = (now + Duration::hours(2)).unix_timestamp();

    let live = create_file(h.files(), now.unix_timestamp(), Some(future), Some(3), None).await;

    let storage_root = tempfile::TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.storage.root = storage_root.path().to_path_buf();

    let state = AppState::new(h.pool.clone(), config, h.access.clone());
    run_cleanup_cycle(&state).await.unwrap();

    assert!(h.files().get(&live.id).await.unwrap().is_some());
}
