use thiserror::Error;
use time::OffsetDateTime;

use crate::auth::{AdminCredentials, AuthError};
use crate::files::{DownloadClaim, FileRecord, FileStore, FileStoreError};
use crate::hotlinks::{HotlinkError, HotlinkResolver};
use crate::sessions::{SessionCookie, SessionError, SessionStore};
use crate::unlock::{PasswordSubmission, UnlockError, UnlockGate};

/// A cookie the HTTP layer should set in its response.
///
/// The core never touches `Set-Cookie` headers; it hands these value objects
/// back alongside each verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// `None` for a browser-session cookie, a past instant to clear.
    pub expires_at: Option<OffsetDateTime>,
}

impl SetCookie {
    fn from_session(name: &str, cookie: SessionCookie) -> Self {
        Self {
            name: name.to_string(),
            value: cookie.token,
            expires_at: Some(cookie.expires_at),
        }
    }

    /// A cookie that removes its browser-side counterpart.
    pub fn clearing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            expires_at: Some(OffsetDateTime::UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("session store error: {0}")]
    Session(#[from] SessionError),
    #[error("file store error: {0}")]
    Files(#[from] FileStoreError),
    #[error("hotlink resolver error: {0}")]
    Hotlinks(#[from] HotlinkError),
    #[error("unlock gate error: {0}")]
    Unlock(#[from] UnlockError),
    #[error("credential verifier error: {0}")]
    Credentials(#[from] AuthError),
}

#[derive(Debug)]
pub enum LoginVerdict {
    LoggedIn { cookie: SetCookie },
    IncorrectCredentials,
}

#[derive(Debug)]
pub enum AdminAccess {
    Authenticated {
        /// Present when the sliding-renewal policy rotated the token; the
        /// HTTP layer must update the session cookie.
        refreshed: Option<SetCookie>,
    },
    Unauthenticated,
}

/// Verdict for the public file info page. Page views never consume quota.
#[derive(Debug)]
pub enum PageVerdict {
    Ok(FileRecord),
    PasswordRequired,
    ExpiredOrNotFound,
}

#[derive(Debug)]
pub enum UnlockVerdict {
    Unlocked {
        record: FileRecord,
        cookie: SetCookie,
    },
    IncorrectPassword,
    ExpiredOrNotFound,
}

/// Verdict for an actual byte transfer; this is the only path that consumes
/// download quota.
#[derive(Debug)]
pub enum TransferVerdict {
    Allowed {
        record: FileRecord,
        remaining: Option<i64>,
    },
    PasswordRequired,
    ExpiredOrNotFound,
}

/// Orchestrates the stores into per-request authorization decisions.
///
/// Holds no request state of its own; every operation takes an injected `now`
/// which is read once per decision and reused through its atomic step.
/// Expired and unknown identifiers collapse into one external outcome so the
/// response never reveals which of the two it was.
#[derive(Clone)]
pub struct AccessController {
    sessions: SessionStore,
    files: FileStore,
    hotlinks: HotlinkResolver,
    gate: UnlockGate,
    admin: AdminCredentials,
    session_cookie_name: String,
}

impl AccessController {
    pub fn new(
        sessions: SessionStore,
        files: FileStore,
        hotlinks: HotlinkResolver,
        gate: UnlockGate,
        admin: AdminCredentials,
        session_cookie_name: String,
    ) -> Self {
        Self {
            sessions,
            files,
            hotlinks,
            gate,
            admin,
            session_cookie_name,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn hotlinks(&self) -> &HotlinkResolver {
        &self.hotlinks
    }

    pub fn gate(&self) -> &UnlockGate {
        &self.gate
    }

    /// Check submitted admin credentials and open a session on success.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<LoginVerdict, AccessError> {
        if !self.admin.verify(username, password).await? {
            return Ok(LoginVerdict::IncorrectCredentials);
        }

        let cookie = self.sessions.create(now).await?;
        Ok(LoginVerdict::LoggedIn {
            cookie: SetCookie::from_session(&self.session_cookie_name, cookie),
        })
    }

    /// Invalidate the session and clear the cookie.
    pub async fn logout(&self, token: Option<&str>) -> Result<SetCookie, AccessError> {
        if let Some(token) = token {
            self.sessions.invalidate(token).await?;
        }
        Ok(SetCookie::clearing(&self.session_cookie_name))
    }

    /// Authorize an admin route, applying sliding renewal as a side effect.
    pub async fn admin_access(
        &self,
        token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<AdminAccess, AccessError> {
        let Some(token) = token else {
            return Ok(AdminAccess::Unauthenticated);
        };

        if self.sessions.validate(token, now).await?.is_none() {
            return Ok(AdminAccess::Unauthenticated);
        }

        let refreshed = self
            .sessions
            .renew_if_needed(token, now)
            .await?
            .map(|cookie| SetCookie::from_session(&self.session_cookie_name, cookie));

        Ok(AdminAccess::Authenticated { refreshed })
    }

    /// Authorize the public file info page for a direct link.
    pub async fn file_page(
        &self,
        file_id: &str,
        unlock_token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<PageVerdict, AccessError> {
        let Some(record) = self.files.get(file_id).await? else {
            return Ok(PageVerdict::ExpiredOrNotFound);
        };

        if record.is_expired(now) {
            return Ok(PageVerdict::ExpiredOrNotFound);
        }

        if record.is_protected() && !self.unlocked(&record, unlock_token) {
            return Ok(PageVerdict::PasswordRequired);
        }

        Ok(PageVerdict::Ok(record))
    }

    /// Handle a password submission for a protected file.
    pub async fn submit_password(
        &self,
        file_id: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<UnlockVerdict, AccessError> {
        let Some(record) = self.files.get(file_id).await? else {
            return Ok(UnlockVerdict::ExpiredOrNotFound);
        };

        if record.is_expired(now) {
            return Ok(UnlockVerdict::ExpiredOrNotFound);
        }

        match self.gate.issue(&record, password).await? {
            PasswordSubmission::Unlocked(token) => {
                let cookie = SetCookie {
                    name: UnlockGate::cookie_name(&record.id),
                    value: token,
                    expires_at: record
                        .expires_at
                        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
                };
                Ok(UnlockVerdict::Unlocked { record, cookie })
            }
            PasswordSubmission::Incorrect => Ok(UnlockVerdict::IncorrectPassword),
        }
    }

    /// Authorize a byte transfer for a direct link and claim one download.
    ///
    /// The request that takes the last remaining unit still succeeds; only
    /// requests after it observe the record as expired.
    pub async fn download(
        &self,
        file_id: &str,
        unlock_token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<TransferVerdict, AccessError> {
        let Some(record) = self.files.get(file_id).await? else {
            return Ok(TransferVerdict::ExpiredOrNotFound);
        };

        if record.is_expired(now) {
            return Ok(TransferVerdict::ExpiredOrNotFound);
        }

        if record.is_protected() && !self.unlocked(&record, unlock_token) {
            return Ok(TransferVerdict::PasswordRequired);
        }

        match self.files.consume_download(&record.id, now).await? {
            DownloadClaim::Allowed { remaining } => {
                Ok(TransferVerdict::Allowed { record, remaining })
            }
            // Lost the claim to a concurrent request between lookup and
            // decrement.
            DownloadClaim::Expired | DownloadClaim::NotFound => {
                Ok(TransferVerdict::ExpiredOrNotFound)
            }
        }
    }

    /// Authorize a byte transfer through a hotlink.
    ///
    /// An expired target is externally identical to an unknown hotlink, and
    /// protected files are never reachable this way.
    pub async fn hotlink_download(
        &self,
        hotlink_id: &str,
        now: OffsetDateTime,
    ) -> Result<TransferVerdict, AccessError> {
        let Some(file_id) = self.hotlinks.resolve(hotlink_id).await? else {
            return Ok(TransferVerdict::ExpiredOrNotFound);
        };

        match self.download(&file_id, None, now).await? {
            TransferVerdict::PasswordRequired => Ok(TransferVerdict::ExpiredOrNotFound),
            verdict => Ok(verdict),
        }
    }

    fn unlocked(&self, record: &FileRecord, unlock_token: Option<&str>) -> bool {
        unlock_token
            .map(|token| self.gate.verify(record, token))
            .unwrap_or(false)
    }
}
