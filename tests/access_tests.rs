// End-to-end access-control scenarios driven through the Access Controller
// with an injected clock.

mod common;

use time::{Duration, OffsetDateTime};

use common::{create_file, harness, ADMIN_PASSWORD, ADMIN_USERNAME, SESSION_COOKIE_NAME, SESSION_TTL};
use kapsel::access::{AdminAccess, LoginVerdict, PageVerdict, TransferVerdict, UnlockVerdict};
use kapsel::auth;

const FILE_PASSWORD: &str = "open sesame";

#[tokio::test]
async fn login_issues_session_cookie_and_logout_revokes_it() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();

    let cookie = match h
        .access
        .login(ADMIN_USERNAME, ADMIN_PASSWORD, now)
        .await
        .unwrap()
    {
        LoginVerdict::LoggedIn { cookie } => cookie,
        LoginVerdict::IncorrectCredentials => panic!("valid credentials were rejected"),
    };
    assert_eq!(cookie.name, SESSION_COOKIE_NAME);

    assert!(matches!(
        h.access
            .admin_access(Some(&cookie.value), now)
            .await
            .unwrap(),
        AdminAccess::Authenticated { .. }
    ));

    let clearing = h.access.logout(Some(&cookie.value)).await.unwrap();
    assert_eq!(clearing.name, SESSION_COOKIE_NAME);
    assert!(clearing.value.is_empty());

    assert!(matches!(
        h.access
            .admin_access(Some(&cookie.value), now)
            .await
            .unwrap(),
        AdminAccess::Unauthenticated
    ));
}

#[tokio::test]
async fn wrong_credentials_are_rejected() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();

    assert!(matches!(
        h.access
            .login(ADMIN_USERNAME, "wrong password", now)
            .await
            .unwrap(),
        LoginVerdict::IncorrectCredentials
    ));
    assert!(matches!(
        h.access
            .login("someone-else", ADMIN_PASSWORD, now)
            .await
            .unwrap(),
        LoginVerdict::IncorrectCredentials
    ));

    // No cookie at all is simply unauthenticated.
    assert!(matches!(
        h.access.admin_access(None, now).await.unwrap(),
        AdminAccess::Unauthenticated
    ));
}

#[tokio::test]
async fn session_expires_after_ttl() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();

    let cookie = match h
        .access
        .login(ADMIN_USERNAME, ADMIN_PASSWORD, now)
        .await
        .unwrap()
    {
        LoginVerdict::LoggedIn { cookie } => cookie,
        LoginVerdict::IncorrectCredentials => panic!("valid credentials were rejected"),
    };

    // Advance the simulated clock past the TTL.
    let later = now + SESSION_TTL + Duration::seconds(1);
    assert!(matches!(
        h.access
            .admin_access(Some(&cookie.value), later)
            .await
            .unwrap(),
        AdminAccess::Unauthenticated
    ));
}

#[tokio::test]
async fn admin_access_refreshes_the_cookie_inside_the_renewal_window() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();

    let cookie = match h
        .access
        .login(ADMIN_USERNAME, ADMIN_PASSWORD, now)
        .await
        .unwrap()
    {
        LoginVerdict::LoggedIn { cookie } => cookie,
        LoginVerdict::IncorrectCredentials => panic!("valid credentials were rejected"),
    };

    let in_window = now + SESSION_TTL - Duration::minutes(5);
    let refreshed = match h
        .access
        .admin_access(Some(&cookie.value), in_window)
        .await
        .unwrap()
    {
        AdminAccess::Authenticated { refreshed } => refreshed,
        AdminAccess::Unauthenticated => panic!("session should still be valid"),
    };

    let refreshed = refreshed.expect("renewal due inside the window");
    assert_ne!(refreshed.value, cookie.value);

    // The rotated token authenticates; the renewal is not repeated for it.
    match h
        .access
        .admin_access(Some(&refreshed.value), in_window)
        .await
        .unwrap()
    {
        AdminAccess::Authenticated { refreshed } => assert!(refreshed.is_none()),
        AdminAccess::Unauthenticated => panic!("rotated token should authenticate"),
    }
}

#[tokio::test]
async fn two_simultaneous_downloads_of_a_single_quota_file() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(1), None).await;

    let first = {
        let access = h.access.clone();
        let id = record.id.clone();
        tokio::spawn(async move { access.download(&id, None, now).await.unwrap() })
    };
    let second = {
        let access = h.access.clone();
        let id = record.id.clone();
        tokio::spawn(async move { access.download(&id, None, now).await.unwrap() })
    };

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let allowed = outcomes
        .iter()
        .filter(|verdict| matches!(verdict, TransferVerdict::Allowed { .. }))
        .count();
    let gone = outcomes
        .iter()
        .filter(|verdict| matches!(verdict, TransferVerdict::ExpiredOrNotFound))
        .count();

    assert_eq!((allowed, gone), (1, 1));
}

#[tokio::test]
async fn page_views_do_not_consume_quota() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(1), None).await;

    for _ in 0..5 {
        assert!(matches!(
            h.access.file_page(&record.id, None, now).await.unwrap(),
            PageVerdict::Ok(_)
        ));
    }

    let stored = h.files().get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.downloads_remaining, Some(1));
}

#[tokio::test]
async fn password_gate_flow() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    // No unlock cookie: the page and the transfer both demand a password.
    assert!(matches!(
        h.access.file_page(&record.id, None, now).await.unwrap(),
        PageVerdict::PasswordRequired
    ));
    assert!(matches!(
        h.access.download(&record.id, None, now).await.unwrap(),
        TransferVerdict::PasswordRequired
    ));

    // Wrong password is called out as such.
    assert!(matches!(
        h.access
            .submit_password(&record.id, "wrong", now)
            .await
            .unwrap(),
        UnlockVerdict::IncorrectPassword
    ));

    // Correct password yields the scoped unlock cookie.
    let cookie = match h
        .access
        .submit_password(&record.id, FILE_PASSWORD, now)
        .await
        .unwrap()
    {
        UnlockVerdict::Unlocked { cookie, .. } => cookie,
        _ => panic!("correct password should unlock the file"),
    };
    assert_eq!(cookie.name, format!("p{}", record.id));

    // The cookie satisfies both the page and the transfer.
    assert!(matches!(
        h.access
            .file_page(&record.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        PageVerdict::Ok(_)
    ));
    assert!(matches!(
        h.access
            .download(&record.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        TransferVerdict::Allowed { .. }
    ));

    // A garbage cookie satisfies neither.
    assert!(matches!(
        h.access
            .file_page(&record.id, Some("forged"), now)
            .await
            .unwrap(),
        PageVerdict::PasswordRequired
    ));
}

#[tokio::test]
async fn unlock_cookie_is_rejected_for_another_file() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let file_a = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;
    let file_b = create_file(h.files(), now.unix_timestamp(), None, Some(3), Some(&hash)).await;

    let cookie = match h
        .access
        .submit_password(&file_a.id, FILE_PASSWORD, now)
        .await
        .unwrap()
    {
        UnlockVerdict::Unlocked { cookie, .. } => cookie,
        _ => panic!("correct password should unlock the file"),
    };

    assert!(matches!(
        h.access
            .file_page(&file_b.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        PageVerdict::PasswordRequired
    ));
}

#[tokio::test]
async fn expiry_is_monotonic_even_for_correct_passwords() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let hash = auth::hash_password(FILE_PASSWORD).await.unwrap();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(1), Some(&hash)).await;

    let cookie = match h
        .access
        .submit_password(&record.id, FILE_PASSWORD, now)
        .await
        .unwrap()
    {
        UnlockVerdict::Unlocked { cookie, .. } => cookie,
        _ => panic!("correct password should unlock the file"),
    };

    // Drain the quota.
    assert!(matches!(
        h.access
            .download(&record.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        TransferVerdict::Allowed { .. }
    ));

    // Nothing brings the record back, not even the right password.
    assert!(matches!(
        h.access
            .file_page(&record.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        PageVerdict::ExpiredOrNotFound
    ));
    assert!(matches!(
        h.access
            .submit_password(&record.id, FILE_PASSWORD, now)
            .await
            .unwrap(),
        UnlockVerdict::ExpiredOrNotFound
    ));
    assert!(matches!(
        h.access
            .download(&record.id, Some(&cookie.value), now)
            .await
            .unwrap(),
        TransferVerdict::ExpiredOrNotFound
    ));
}

#[tokio::test]
async fn hotlink_shares_the_file_lifecycle() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let record = create_file(h.files(), now.unix_timestamp(), None, Some(1), None).await;

    let hotlink_id = h.hotlinks().register(&record.id).await.unwrap().unwrap();

    // The hotlink serves the file and consumes its quota.
    assert!(matches!(
        h.access.hotlink_download(&hotlink_id, now).await.unwrap(),
        TransferVerdict::Allowed { .. }
    ));

    // Once the file is expired the hotlink answers exactly like an unknown one.
    assert!(matches!(
        h.access.hotlink_download(&hotlink_id, now).await.unwrap(),
        TransferVerdict::ExpiredOrNotFound
    ));
    assert!(matches!(
        h.access.hotlink_download("never-registered", now).await.unwrap(),
        TransferVerdict::ExpiredOrNotFound
    ));
}

#[tokio::test]
async fn unknown_and_expired_files_are_indistinguishable() {
    let h = harness().await;
    let now = OffsetDateTime::now_utc();
    let past = (now - Duration::hours(2)).unix_timestamp();
    let expired = create_file(h.files(), past, Some(past), Some(3), None).await;

    assert!(matches!(
        h.access.file_page(&expired.id, None, now).await.unwrap(),
        PageVerdict::ExpiredOrNotFound
    ));
    assert!(matches!(
        h.access.file_page("no-such-file-0000000", None, now).await.unwrap(),
        PageVerdict::ExpiredOrNotFound
    ));
}
