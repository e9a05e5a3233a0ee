use std::borrow::ToOwned;
use std::time::Duration;

use argon2::{
    password_hash::{
        rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher,
        PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::task;
use tracing::info;

use crate::config::AppConfig;

/// Argon2 memory cost in kibibytes (~19 MB).
const ARGON2_MEMORY_COST: u32 = 19_456;
/// Argon2 time cost (iterations).
const ARGON2_TIME_COST: u32 = 2;
/// Argon2 parallelism (lanes).
const ARGON2_PARALLELISM: u32 = 1;
/// Length of the produced password hash output (bytes).
const ARGON2_OUTPUT_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    InvalidCredentials,
    #[error("Password hashing join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Password hashing error: {0:?}")]
    PasswordHash(PasswordHashError),
    #[error("Argon2 error: {0:?}")]
    Argon2(argon2::Error),
    #[error("Admin credentials are invalid: {0}")]
    CredentialBootstrap(&'static str),
}

/// Create an Argon2 instance with the desired security parameters.
fn configured_argon2() -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(
        ARGON2_MEMORY_COST,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LENGTH),
    )
    .map_err(AuthError::Argon2)?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id with strong parameters.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_owned();

    Ok(task::spawn_blocking(move || {
        let argon2 = configured_argon2()?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::PasswordHash)?
            .to_string();
        Ok::<_, AuthError>(hash)
    })
    .await??)
}

/// Verify a password against a stored hash.
///
/// A wrong password surfaces as [`AuthError::InvalidCredentials`]; any other
/// error means the stored hash itself could not be processed.
pub async fn verify_password(password: &str, stored_hash: &str) -> Result<(), AuthError> {
    let password = password.to_owned();
    let stored_hash = stored_hash.to_owned();

    task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&stored_hash).map_err(AuthError::PasswordHash)?;
        let verifier = configured_argon2()?;

        match verifier.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(()),
            Err(err) => {
                if matches!(err, PasswordHashError::Password) {
                    Err(AuthError::InvalidCredentials)
                } else {
                    Err(AuthError::PasswordHash(err))
                }
            }
        }
    })
    .await?
}

/// The configured administrator identity checked on every login.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    username: String,
    password_hash: String,
}

impl AdminCredentials {
    /// Resolve admin credentials from configuration.
    ///
    /// When no password hash is configured, a plaintext `ADMIN_PASSWORD`
    /// environment variable is accepted and hashed at startup so a fresh
    /// deployment can bootstrap itself without tooling.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AuthError> {
        let username = config.security.admin_username.trim().to_string();
        if username.is_empty() {
            return Err(AuthError::CredentialBootstrap("username cannot be empty"));
        }

        let configured_hash = config.security.admin_password_hash.trim().to_string();
        if !configured_hash.is_empty() {
            return Ok(Self {
                username,
                password_hash: configured_hash,
            });
        }

        let Ok(plaintext) = std::env::var("ADMIN_PASSWORD") else {
            return Err(AuthError::CredentialBootstrap(
                "either ADMIN_PASSWORD_HASH or ADMIN_PASSWORD must be set",
            ));
        };

        if plaintext.is_empty() {
            return Err(AuthError::CredentialBootstrap("password cannot be empty"));
        }

        let password_hash = hash_password(&plaintext).await?;
        info!(username = %username, "Administrator password hashed from ADMIN_PASSWORD");

        Ok(Self {
            username,
            password_hash,
        })
    }

    /// Check a submitted username/password pair against the configured admin.
    ///
    /// The username comparison is constant time, and the password hash is
    /// verified regardless of whether the username matched so both outcomes
    /// take comparable time.
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let username_matches = self
            .username
            .as_bytes()
            .ct_eq(username.as_bytes())
            .unwrap_u8()
            == 1;

        let password_matches = match verify_password(password, &self.password_hash).await {
            Ok(()) => true,
            Err(AuthError::InvalidCredentials) => false,
            Err(err) => return Err(err),
        };

        Ok(username_matches && password_matches)
    }
}

/// Introduce a small random backoff when login fails to slow brute-force attempts.
pub async fn randomized_backoff() {
    let base_delay = Duration::from_millis(150);
    let jitter = Duration::from_millis(fastrand::u64(0..150));
    tokio::time::sleep(base_delay + jitter).await;
}
