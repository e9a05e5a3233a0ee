use sqlx::{sqlite::SqliteRow, Error as SqlxError, FromRow, Row, SqliteExecutor, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

/// Alphabet for public identifiers (file ids and hotlink ids).
pub(crate) const PUBLIC_ID_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];
/// Length of a public file identifier.
const FILE_ID_LENGTH: usize = 20;
/// Ids longer than this are rejected without touching the database.
pub(crate) const MAX_ID_LENGTH: usize = 128;
/// Attempts before giving up on identifier generation.
const MAX_ID_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("database error: {0}")]
    Database(#[from] SqlxError),
    #[error("could not allocate a unique file identifier")]
    IdExhausted,
}

/// A stored file and its lifecycle state.
///
/// `expires_at` and `downloads_remaining` use NULL as the "never"/"unlimited"
/// sentinel respectively.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    pub stored_path: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub checksum: String,
    pub password_hash: Option<String>,
    pub hotlink_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub downloads_remaining: Option<i64>,
}

impl FileRecord {
    /// The single expiry predicate: past its time window or out of quota.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now.unix_timestamp() {
                return true;
            }
        }
        self.downloads_remaining == Some(0)
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Metadata for a freshly uploaded file.
pub struct NewFile<'a> {
    pub original_name: &'a str,
    pub stored_path: &'a str,
    pub size_bytes: i64,
    pub content_type: Option<&'a str>,
    pub checksum: &'a str,
    pub password_hash: Option<&'a str>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub downloads_remaining: Option<i64>,
}

/// Outcome of the atomic download-quota claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadClaim {
    /// The caller may transfer the file; `remaining` is the post-decrement
    /// count (None for unlimited files).
    Allowed { remaining: Option<i64> },
    Expired,
    NotFound,
}

/// Store for file records and their hotlink mappings.
#[derive(Clone)]
pub struct FileStore {
    db: SqlitePool,
}

impl FileStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a new file record under a freshly assigned identifier.
    pub async fn create(&self, new: &NewFile<'_>) -> Result<FileRecord, FileStoreError> {
        let mut attempts = 0usize;

        loop {
            let id = nanoid::nanoid!(FILE_ID_LENGTH, &PUBLIC_ID_ALPHABET);

            let inserted = sqlx::query(
                r#"
                INSERT INTO files (
                    id, original_name, stored_path, size_bytes, content_type,
                    checksum, password_hash, hotlink_id, created_at, expires_at,
                    downloads_remaining
                ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(new.original_name)
            .bind(new.stored_path)
            .bind(new.size_bytes)
            .bind(new.content_type)
            .bind(new.checksum)
            .bind(new.password_hash)
            .bind(new.created_at)
            .bind(new.expires_at)
            .bind(new.downloads_remaining)
            .execute(&self.db)
            .await;

            match inserted {
                Ok(_) => {
                    return Ok(FileRecord {
                        id,
                        original_name: new.original_name.to_string(),
                        stored_path: new.stored_path.to_string(),
                        size_bytes: new.size_bytes,
                        content_type: new.content_type.map(ToString::to_string),
                        checksum: new.checksum.to_string(),
                        password_hash: new.password_hash.map(ToString::to_string),
                        hotlink_id: None,
                        created_at: new.created_at,
                        expires_at: new.expires_at,
                        downloads_remaining: new.downloads_remaining,
                    });
                }
                Err(err) if is_unique_violation(&err) && attempts < MAX_ID_GENERATION_ATTEMPTS => {
                    attempts += 1;
                    debug!(target: "files", attempt = attempts, "retrying file id generation");
                }
                Err(err) if is_unique_violation(&err) => return Err(FileStoreError::IdExhausted),
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<FileRecord>, FileStoreError> {
        if id.is_empty() || id.len() > MAX_ID_LENGTH {
            return Ok(None);
        }

        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, original_name, stored_path, size_bytes, content_type,
                   checksum, password_hash, hotlink_id, created_at, expires_at,
                   downloads_remaining
            FROM files
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// List stored files, newest first, for the admin overview.
    pub async fn list(&self, limit: i64) -> Result<Vec<FileRecord>, FileStoreError> {
        let records = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, original_name, stored_path, size_bytes, content_type,
                   checksum, password_hash, hotlink_id, created_at, expires_at,
                   downloads_remaining
            FROM files
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    /// Atomically claim one download.
    ///
    /// The guarded UPDATE decrements only while the record is inside its time
    /// window and has quota left, so two concurrent callers against a file
    /// with one download remaining see exactly one `Allowed` and one
    /// `Expired`, and the counter never goes below zero. NULL quota stays
    /// NULL through the decrement (unlimited files never exhaust).
    pub async fn consume_download(
        &self,
        id: &str,
        now: OffsetDateTime,
    ) -> Result<DownloadClaim, FileStoreError> {
        if id.is_empty() || id.len() > MAX_ID_LENGTH {
            return Ok(DownloadClaim::NotFound);
        }

        let claimed: Option<Option<i64>> = sqlx::query(
            r#"
            UPDATE files
            SET downloads_remaining = downloads_remaining - 1
            WHERE id = ?
              AND (expires_at IS NULL OR expires_at > ?)
              AND (downloads_remaining IS NULL OR downloads_remaining > 0)
            RETURNING downloads_remaining
            "#,
        )
        .bind(id)
        .bind(now.unix_timestamp())
        .map(|row: SqliteRow| row.get::<Option<i64>, _>(0))
        .fetch_optional(&self.db)
        .await?;

        if let Some(remaining) = claimed {
            return Ok(DownloadClaim::Allowed { remaining });
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        if exists.is_some() {
            Ok(DownloadClaim::Expired)
        } else {
            Ok(DownloadClaim::NotFound)
        }
    }

    /// Remove a record (and with it any hotlink mapping); idempotent.
    ///
    /// Returns the stored path so the caller can remove the bytes on disk.
    pub async fn delete(&self, id: &str) -> Result<Option<String>, FileStoreError> {
        if id.is_empty() || id.len() > MAX_ID_LENGTH {
            return Ok(None);
        }

        let stored_path: Option<String> =
            sqlx::query_scalar("DELETE FROM files WHERE id = ? RETURNING stored_path")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        Ok(stored_path)
    }

    /// Replace or clear the file's password hash.
    ///
    /// Unlock tokens are bound to the hash value, so every cookie issued under
    /// the old password stops verifying. Protecting a file also drops its
    /// hotlink, since hotlinks bypass the password gate.
    pub async fn update_password(
        &self,
        id: &str,
        new_hash: Option<&str>,
    ) -> Result<bool, FileStoreError> {
        if id.is_empty() || id.len() > MAX_ID_LENGTH {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE files
            SET password_hash = ?,
                hotlink_id = CASE WHEN ? IS NULL THEN hotlink_id ELSE NULL END
            WHERE id = ?
            "#,
        )
        .bind(new_hash)
        .bind(new_hash)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// A dead record picked up by the background reaper.
#[derive(Debug, FromRow)]
pub struct ExpiredFileForCleanup {
    pub id: String,
    pub stored_path: String,
}

/// List records past their time window or out of quota.
pub async fn list_expired_files_for_cleanup(
    pool: &SqlitePool,
    now: i64,
    limit: i64,
) -> Result<Vec<ExpiredFileForCleanup>, SqlxError> {
    sqlx::query_as::<_, ExpiredFileForCleanup>(
        r#"
        SELECT id, stored_path
        FROM files
        WHERE (expires_at IS NOT NULL AND expires_at <= ?)
           OR downloads_remaining = 0
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Re-check a cleanup candidate under the reaper's transaction.
pub async fn load_expired_file_for_cleanup<'e, E>(
    executor: E,
    id: &str,
    now: i64,
) -> Result<Option<ExpiredFileForCleanup>, SqlxError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, ExpiredFileForCleanup>(
        r#"
        SELECT id, stored_path
        FROM files
        WHERE id = ?
          AND ((expires_at IS NOT NULL AND expires_at <= ?)
               OR downloads_remaining = 0)
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_optional(executor)
    .await
}

/// Delete a record inside the reaper's transaction.
pub async fn delete_file_record<'e, E>(executor: E, id: &str) -> Result<(), SqlxError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Translate a SQLx database error into a uniqueness constraint violation check.
pub(crate) fn is_unique_violation(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => db_err
            .code()
            .map(|code| code.as_ref() == "2067" || code.as_ref() == "1555")
            .unwrap_or(false),
        _ => false,
    }
}
