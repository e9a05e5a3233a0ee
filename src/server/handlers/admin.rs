use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    access::{AdminAccess, SetCookie},
    app_state::AppState,
    auth,
    server::constants::MAX_FILE_PASSWORD_LENGTH,
};

use crate::server::utils::{
    apply_set_cookie, cookie_value, file_unavailable_response, server_error_response,
    unauthenticated_response,
};

const ADMIN_LIST_LIMIT: i64 = 500;

/// Authorize an admin request, surfacing the renewed session cookie when the
/// sliding-expiry policy rotated the token.
pub async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    now: OffsetDateTime,
) -> Result<Option<SetCookie>, Response> {
    let token = cookie_value(headers, &state.config().session.cookie_name);

    match state.access().admin_access(token.as_deref(), now).await {
        Ok(AdminAccess::Authenticated { refreshed }) => Ok(refreshed),
        Ok(AdminAccess::Unauthenticated) => Err(unauthenticated_response()),
        Err(err) => {
            error!(target: "sessions", %err, "failed to authorize admin request");
            Err(server_error_response())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminFileEntry {
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub checksum: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub downloads_remaining: Option<i64>,
    pub protected: bool,
    pub hotlink_id: Option<String>,
}

/// GET /admin — list stored files for the administrator.
pub async fn admin_files_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let now = OffsetDateTime::now_utc();

    let refreshed = match require_admin(&state, &headers, now).await {
        Ok(refreshed) => refreshed,
        Err(response) => return response,
    };

    let records = match state.access().files().list(ADMIN_LIST_LIMIT).await {
        Ok(records) => records,
        Err(err) => {
            error!(target: "files", %err, "failed to list files for admin overview");
            return server_error_response();
        }
    };

    let entries: Vec<AdminFileEntry> = records
        .into_iter()
        .map(|record| AdminFileEntry {
            id: record.id,
            name: record.original_name,
            size_bytes: record.size_bytes,
            content_type: record.content_type,
            checksum: record.checksum,
            created_at: record.created_at,
            expires_at: record.expires_at,
            downloads_remaining: record.downloads_remaining,
            protected: record.password_hash.is_some(),
            hotlink_id: record.hotlink_id,
        })
        .collect();

    let mut response = Json(entries).into_response();
    if let Some(cookie) = refreshed {
        apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
    }
    response
}

/// POST /delete/:id — remove a file record and its stored bytes; idempotent.
pub async fn delete_file_handler(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let now = OffsetDateTime::now_utc();

    let refreshed = match require_admin(&state, &headers, now).await {
        Ok(refreshed) => refreshed,
        Err(response) => return response,
    };

    let stored_path = match state.access().files().delete(&file_id).await {
        Ok(stored_path) => stored_path,
        Err(err) => {
            error!(target: "files", %err, file_id = %file_id, "failed to delete file record");
            return server_error_response();
        }
    };

    if let Some(stored_path) = stored_path {
        let path = state.config().storage.root.join(&stored_path);
        match tokio::fs::remove_file(&path).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target: "files",
                    %err,
                    path = %path.display(),
                    file_id = %file_id,
                    "failed to remove deleted file from disk"
                );
            }
        }

        info!(target: "files", file_id = %file_id, "file deleted by administrator");
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = refreshed {
        apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordForm {
    /// Empty or absent clears the password.
    #[serde(default)]
    password: String,
}

/// POST /files/:id/password — rotate or clear a file's password.
///
/// Every unlock cookie issued under the previous password stops verifying.
pub async fn update_password_handler(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
    headers: HeaderMap,
    Form(form): Form<UpdatePasswordForm>,
) -> Response {
    let now = OffsetDateTime::now_utc();

    let refreshed = match require_admin(&state, &headers, now).await {
        Ok(refreshed) => refreshed,
        Err(response) => return response,
    };

    let submitted = form.password.trim();
    if submitted.len() > MAX_FILE_PASSWORD_LENGTH {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "The file password is too long.",
        )
            .into_response();
    }

    let new_hash = if submitted.is_empty() {
        None
    } else {
        match auth::hash_password(submitted).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!(target: "files", %err, "failed to hash new file password");
                return server_error_response();
            }
        }
    };

    let updated = match state
        .access()
        .files()
        .update_password(&file_id, new_hash.as_deref())
        .await
    {
        Ok(updated) => updated,
        Err(err) => {
            error!(target: "files", %err, file_id = %file_id, "failed to update file password");
            return server_error_response();
        }
    };

    if !updated {
        return file_unavailable_response();
    }

    info!(
        target: "files",
        file_id = %file_id,
        protected = new_hash.is_some(),
        "file password updated"
    );

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = refreshed {
        apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
    }
    response
}
