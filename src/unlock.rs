use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::auth::{self, AuthError};
use crate::files::FileRecord;

const MIN_SECRET_LEN: usize = 32;
const MAX_TOKEN_LENGTH: usize = 512;

/// Unlock cookies are named with this prefix plus the file id, so a cookie
/// issued for one file can never be replayed against another.
pub const UNLOCK_COOKIE_PREFIX: &str = "p";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum UnlockError {
    #[error("unlock token secret is too short")]
    SecretTooShort,
    #[error("failed to decode unlock token secret: {0}")]
    SecretDecode(String),
    #[error("password check failed: {0}")]
    PasswordCheck(#[from] AuthError),
}

/// Result of submitting a password for a protected file.
#[derive(Debug, Clone)]
pub enum PasswordSubmission {
    /// Correct password; the token goes into the file's unlock cookie.
    Unlocked(String),
    Incorrect,
}

/// Issues and validates per-file unlock tokens.
///
/// A token is the HMAC of (file id, current password hash) under a
/// server-side secret. It is recomputed on every check, so rotating the
/// file's password invalidates every previously issued cookie without any
/// bookkeeping.
#[derive(Clone)]
pub struct UnlockGate {
    secret: Arc<[u8]>,
}

impl UnlockGate {
    pub fn from_config(secret: &str) -> Result<Self, UnlockError> {
        let secret_bytes = resolve_secret_bytes(secret)?;
        Ok(Self {
            secret: Arc::from(secret_bytes.into_boxed_slice()),
        })
    }

    /// Cookie name scoped to one file.
    pub fn cookie_name(file_id: &str) -> String {
        format!("{UNLOCK_COOKIE_PREFIX}{file_id}")
    }

    pub fn is_protected(record: &FileRecord) -> bool {
        record.is_protected()
    }

    /// Check a submitted password and mint an unlock token on success.
    pub async fn issue(
        &self,
        record: &FileRecord,
        submitted_password: &str,
    ) -> Result<PasswordSubmission, UnlockError> {
        let Some(password_hash) = record.password_hash.as_deref() else {
            // Unprotected files have nothing to unlock.
            return Ok(PasswordSubmission::Incorrect);
        };

        match auth::verify_password(submitted_password, password_hash).await {
            Ok(()) => {}
            Err(AuthError::InvalidCredentials) => return Ok(PasswordSubmission::Incorrect),
            Err(err) => return Err(err.into()),
        }

        let signature = self.derive(&record.id, password_hash)?;
        Ok(PasswordSubmission::Unlocked(URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Check a presented unlock token against the record's current state.
    ///
    /// Fails closed: a missing or malformed token, a token minted for another
    /// file, a rotated password, or an unprotected record all yield `false`.
    pub fn verify(&self, record: &FileRecord, token: &str) -> bool {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return false;
        }

        let Some(password_hash) = record.password_hash.as_deref() else {
            return false;
        };

        let Ok(supplied) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };

        let Ok(expected) = self.derive(&record.id, password_hash) else {
            return false;
        };

        supplied.len() == expected.len()
            && supplied.as_slice().ct_eq(expected.as_slice()).unwrap_u8() == 1
    }

    fn derive(&self, file_id: &str, password_hash: &str) -> Result<Vec<u8>, UnlockError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| UnlockError::SecretTooShort)?;
        mac.update(file_id.as_bytes());
        mac.update(password_hash.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn resolve_secret_bytes(secret: &str) -> Result<Vec<u8>, UnlockError> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Err(UnlockError::SecretTooShort);
    }

    let bytes = if let Some(rest) = trimmed.strip_prefix("base64:") {
        STANDARD
            .decode(rest)
            .map_err(|err| UnlockError::SecretDecode(err.to_string()))?
    } else {
        trimmed.as_bytes().to_vec()
    };

    if bytes.len() < MIN_SECRET_LEN {
        return Err(UnlockError::SecretTooShort);
    }

    Ok(bytes)
}
