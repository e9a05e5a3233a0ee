use crate::config::AppConfig;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
}

/// Initialize database connection pool with proper SQLite configuration
pub async fn create_pool(config: &AppConfig) -> Result<SqlitePool, DatabaseError> {
    info!("Initializing database connection pool");

    // Parse the database URL and configure SQLite options
    let mut connect_options = SqliteConnectOptions::from_str(&config.database.url)
        .map_err(|e| DatabaseError::InvalidUrl(format!("Invalid database URL: {}", e)))?;

    // Configure SQLite with WAL mode and busy timeout
    connect_options = connect_options
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(connect_options).await?;

    info!(
        "Database connection pool created with max connections: {}",
        config.database.max_connections
    );

    Ok(pool)
}

/// Initialize database with connection pool and schema
pub async fn initialize_database(config: &AppConfig) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(config).await?;

    create_tables(&pool).await?;

    info!("Database initialization completed successfully");

    Ok(pool)
}

/// Create all required tables manually
pub async fn create_tables(pool: &SqlitePool) -> Result<(), DatabaseError> {
    info!("Creating database tables");

    // Create files table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            original_name TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_type TEXT,
            checksum TEXT NOT NULL,
            password_hash TEXT,
            hotlink_id TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            downloads_remaining INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    ensure_files_table_schema(pool).await?;

    // Create sessions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            renewed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indices
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_files_hotlink_id ON files(hotlink_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files(expires_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)")
        .execute(pool)
        .await?;

    info!("Database tables created successfully");

    Ok(())
}

/// Ensure the files table has the expected columns when upgrading existing databases.
async fn ensure_files_table_schema(pool: &SqlitePool) -> Result<(), DatabaseError> {
    let has_password_hash_column: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM pragma_table_info('files') WHERE name = 'password_hash' LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    if has_password_hash_column.is_none() {
        info!("Adding password_hash column to files table");
        sqlx::query("ALTER TABLE files ADD COLUMN password_hash TEXT")
            .execute(pool)
            .await?;
    }

    Ok(())
}
