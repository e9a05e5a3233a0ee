// Per-file unlock tokens: scoping, password rotation, and fail-closed
// verification.

mod common;

use time::OffsetDateTime;

use common::{create_file, harness};
use kapsel::auth;
use kapsel::unlock::{PasswordSubmission, UnlockGate};

const FILE_PASSWORD: &str = "open sesame";

#[tokio::test]
async fn correct_password_issues_verifiable_token() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    let token = match h.gate().issue(&record, FILE_PASSWORD).await.unwrap() {
        PasswordSubmission::Unlocked(token) => token,
        PasswordSubmission::Incorrect => panic!("correct password was rejected"),
    };

    assert!(h.gate().verify(&record, &token));
}

#[tokio::test]
async fn wrong_password_is_distinguishable_but_yields_no_token() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    assert!(matches!(
        h.gate().issue(&record, "not the password").await.unwrap(),
        PasswordSubmission::Incorrect
    ));
}

#[tokio::test]
async fn token_for_one_file_is_rejected_for_another() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let file_a = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;
    let file_b = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    let token_a = match h.gate().issue(&file_a, FILE_PASSWORD).await.unwrap() {
        PasswordSubmission::Unlocked(token) => token,
        PasswordSubmission::Incorrect => panic!("correct password was rejected"),
    };

    // Same password, same hash input, different file id: the binding differs.
    assert!(h.gate().verify(&file_a, &token_a));
    assert!(!h.gate().verify(&file_b, &token_a));
}

#[tokio::test]
async fn token_is_invalidated_by_password_rotation() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let old_hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&old_hash)).await;

    let token = match h.gate().issue(&record, FILE_PASSWORD).await.unwrap() {
        PasswordSubmission::Unlocked(token) => token,
        PasswordSubmission::Incorrect => panic!("correct password was rejected"),
    };

    let new_hash = auth::hash_password("a different password").await.unwrap();
    assert!(h
        .files()
        .update_password(&record.id, Some(&new_hash))
        .await
        .unwrap());

    let rotated = h.files().get(&record.id).await.unwrap().unwrap();
    assert!(!h.gate().verify(&rotated, &token));
}

#[tokio::test]
async fn verification_fails_closed() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let protected =
        create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;
    let unprotected = create_file(h.files(), now.unix_timestamp(), None, Some(3), None).await;

    // Garbage, empty, and oversized tokens are all rejected.
    assert!(!h.gate().verify(&protected, ""));
    assert!(!h.gate().verify(&protected, "not-base64!@#"));
    assert!(!h.gate().verify(&protected, &"A".repeat(4096)));

    // An unprotected record accepts no token at all.
    assert!(!h.gate().verify(&unprotected, "anything"));

    // And submitting a password against it yields no unlock either.
    assert!(matches!(
        h.gate().issue(&unprotected, FILE_PASSWORD).await.unwrap(),
        PasswordSubmission::Incorrect
    ));
}

#[tokio::test]
async fn cookie_names_are_scoped_per_file() {
    assert_eq!(UnlockGate::cookie_name("abc123"), "pabc123");
    assert_ne!(UnlockGate::cookie_name("fileA"), UnlockGate::cookie_name("fileB"));
}
