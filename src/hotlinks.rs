use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

use crate::files::{is_unique_violation, MAX_ID_LENGTH, PUBLIC_ID_ALPHABET};

/// Length of a public hotlink identifier.
const HOTLINK_ID_LENGTH: usize = 32;
/// Attempts before giving up on identifier generation.
const MAX_ID_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum HotlinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not allocate a unique hotlink identifier")]
    IdExhausted,
}

/// Resolves short public hotlink identifiers to file identifiers.
///
/// Hotlink mappings live on the file record itself, so they share the file's
/// expiry and quota state and disappear with it; this type is a view over
/// that column, not an independent store.
#[derive(Clone)]
pub struct HotlinkResolver {
    db: SqlitePool,
}

impl HotlinkResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Attach a hotlink identifier to a file.
    ///
    /// Returns the existing identifier when one is already registered.
    /// Password-protected files never get a hotlink (hotlinks bypass the
    /// password gate), and a missing file yields `None`.
    pub async fn register(&self, file_id: &str) -> Result<Option<String>, HotlinkError> {
        if file_id.is_empty() || file_id.len() > MAX_ID_LENGTH {
            return Ok(None);
        }

        let current: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT hotlink_id, password_hash FROM files WHERE id = ?")
                .bind(file_id)
                .fetch_optional(&self.db)
                .await?;

        let Some((existing, password_hash)) = current else {
            return Ok(None);
        };

        if password_hash.is_some() {
            return Ok(None);
        }

        if let Some(existing) = existing {
            return Ok(Some(existing));
        }

        let mut attempts = 0usize;

        loop {
            let candidate = nanoid::nanoid!(HOTLINK_ID_LENGTH, &PUBLIC_ID_ALPHABET);

            let updated = sqlx::query(
                r#"
                UPDATE files
                SET hotlink_id = ?
                WHERE id = ? AND password_hash IS NULL AND hotlink_id IS NULL
                "#,
            )
            .bind(&candidate)
            .bind(file_id)
            .execute(&self.db)
            .await;

            match updated {
                Ok(result) if result.rows_affected() == 1 => return Ok(Some(candidate)),
                // Lost a race against delete/protect/another register.
                Ok(_) => return Ok(None),
                Err(err) if is_unique_violation(&err) && attempts < MAX_ID_GENERATION_ATTEMPTS => {
                    attempts += 1;
                    debug!(target: "links", attempt = attempts, "retrying hotlink id generation");
                }
                Err(err) if is_unique_violation(&err) => return Err(HotlinkError::IdExhausted),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Map a hotlink identifier to its file identifier.
    ///
    /// Expiry and quota are not consulted here; the caller runs the resolved
    /// id through the same lifecycle checks as a direct link.
    pub async fn resolve(&self, hotlink_id: &str) -> Result<Option<String>, HotlinkError> {
        if hotlink_id.is_empty() || hotlink_id.len() > MAX_ID_LENGTH {
            return Ok(None);
        }

        let file_id: Option<String> = sqlx::query_scalar("SELECT id FROM files WHERE hotlink_id = ?")
            .bind(hotlink_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(file_id)
    }

    /// Detach the hotlink from a file; idempotent.
    pub async fn unregister(&self, file_id: &str) -> Result<(), HotlinkError> {
        if file_id.is_empty() || file_id.len() > MAX_ID_LENGTH {
            return Ok(());
        }

        sqlx::query("UPDATE files SET hotlink_id = NULL WHERE id = ?")
            .bind(file_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
