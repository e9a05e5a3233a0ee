use sqlx::SqlitePool;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Alphabet used for session tokens (URL- and cookie-safe).
const TOKEN_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];
/// 48 alphanumeric characters carry well over 128 bits of randomness.
const TOKEN_LENGTH: usize = 48;
/// Tokens longer than this are rejected without touching the database.
const MAX_TOKEN_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A stored login session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    pub token: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub renewed: bool,
}

/// Token and expiry handed to the HTTP layer for the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Store for admin login sessions.
///
/// Owns the `sessions` table exclusively. All expiry decisions take an
/// injected `now` so callers read the clock once per request.
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
    ttl: Duration,
    renew_within: Duration,
}

impl SessionStore {
    pub fn new(db: SqlitePool, ttl: Duration, renew_within: Duration) -> Self {
        Self {
            db,
            ttl,
            renew_within,
        }
    }

    /// Issue a fresh session after the caller has verified credentials.
    pub async fn create(&self, now: OffsetDateTime) -> Result<SessionCookie, SessionError> {
        let token = nanoid::nanoid!(TOKEN_LENGTH, &TOKEN_ALPHABET);
        let expires_at = now + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO sessions (token, created_at, expires_at, renewed)
            VALUES (?, ?, ?, 0)
            "#,
        )
        .bind(&token)
        .bind(now.unix_timestamp())
        .bind(expires_at.unix_timestamp())
        .execute(&self.db)
        .await?;

        Ok(SessionCookie { token, expires_at })
    }

    /// Look up a session, treating unknown and expired tokens identically.
    pub async fn validate(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<SessionRecord>, SessionError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Ok(None);
        }

        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT token, created_at, expires_at, renewed
            FROM sessions
            WHERE token = ? AND expires_at > ?
            "#,
        )
        .bind(token)
        .bind(now.unix_timestamp())
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// Apply the sliding-expiry policy to a validated token.
    ///
    /// When the session's remaining lifetime has dropped below the renewal
    /// window, the old record's `renewed` flag is claimed in a single guarded
    /// UPDATE and a rotated replacement token is issued. Concurrent requests
    /// carrying the same token race on that claim, so at most one of them
    /// observes a renewal; the rest keep using the outgoing token, which
    /// stays valid until its original expiry. Expired sessions never renew.
    pub async fn renew_if_needed(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<SessionCookie>, SessionError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Ok(None);
        }

        let renew_before = now + self.renew_within;

        let claimed = sqlx::query(
            r#"
            UPDATE sessions
            SET renewed = 1
            WHERE token = ?
              AND renewed = 0
              AND expires_at > ?
              AND expires_at <= ?
            "#,
        )
        .bind(token)
        .bind(now.unix_timestamp())
        .bind(renew_before.unix_timestamp())
        .execute(&self.db)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let replacement = self.create(now).await?;
        debug!(
            target: "sessions",
            expires_at = replacement.expires_at.unix_timestamp(),
            "session renewed with rotated token"
        );

        Ok(Some(replacement))
    }

    /// Explicit logout; subsequent validations of the token fail.
    pub async fn invalidate(&self, token: &str) -> Result<(), SessionError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Ok(());
        }

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Remove dead session records; returns the number pruned.
    pub async fn prune_expired(&self, now: OffsetDateTime) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.unix_timestamp())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
