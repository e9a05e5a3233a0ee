// Not every test binary exercises every helper.
#![allow(dead_code)]

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use time::Duration;

use kapsel::access::AccessController;
use kapsel::auth::AdminCredentials;
use kapsel::config::AppConfig;
use kapsel::database;
use kapsel::files::{FileRecord, FileStore, NewFile};
use kapsel::hotlinks::HotlinkResolver;
use kapsel::sessions::SessionStore;
use kapsel::unlock::UnlockGate;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct-horse-battery";
pub const SESSION_COOKIE_NAME: &str = "session_token";
pub const SESSION_TTL: Duration = Duration::minutes(30);
pub const RENEW_WITHIN: Duration = Duration::minutes(15);
const UNLOCK_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Everything a test needs to drive the access core against a real
/// (tempfile-backed) SQLite database.
pub struct TestHarness {
    pub pool: SqlitePool,
    pub access: AccessController,
    _tmp: TempDir,
}

impl TestHarness {
    pub fn sessions(&self) -> &SessionStore {
        self.access.sessions()
    }

    pub fn files(&self) -> &FileStore {
        self.access.files()
    }

    pub fn hotlinks(&self) -> &HotlinkResolver {
        self.access.hotlinks()
    }

    pub fn gate(&self) -> &UnlockGate {
        self.access.gate()
    }
}

pub async fn harness() -> TestHarness {
    let tmp = TempDir::new().expect("create temp dir");
    let db_path = tmp.path().join("kapsel-test.db");

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .expect("connect test database");

    database::create_tables(&pool).await.expect("create tables");

    let mut config = AppConfig::default();
    config.security.admin_username = ADMIN_USERNAME.to_string();
    config.security.admin_password_hash = kapsel::auth::hash_password(ADMIN_PASSWORD)
        .await
        .expect("hash admin password");

    let admin = AdminCredentials::from_config(&config)
        .await
        .expect("resolve admin credentials");

    let sessions = SessionStore::new(pool.clone(), SESSION_TTL, RENEW_WITHIN);
    let files = FileStore::new(pool.clone());
    let hotlinks = HotlinkResolver::new(pool.clone());
    let gate = UnlockGate::from_config(UNLOCK_SECRET).expect("build unlock gate");

    let access = AccessController::new(
        sessions,
        files,
        hotlinks,
        gate,
        admin,
        SESSION_COOKIE_NAME.to_string(),
    );

    TestHarness {
        pool,
        access,
        _tmp: tmp,
    }
}

/// Insert a file record with controlled lifecycle fields.
pub async fn create_file(
    files: &FileStore,
    created_at: i64,
    expires_at: Option<i64>,
    downloads_remaining: Option<i64>,
    password_hash: Option<&str>,
) -> FileRecord {
    files
        .create(&NewFile {
            original_name: "hello.txt",
            stored_path: "2026/08/06/test-object",
            size_bytes: 5,
            content_type: Some("text/plain"),
            checksum: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            password_hash,
            created_at,
            expires_at,
            downloads_remaining,
        })
        .await
        .expect("create file record")
}
