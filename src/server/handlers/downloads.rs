use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::{
    access::{PageVerdict, TransferVerdict, UnlockVerdict},
    app_state::AppState,
    files::FileRecord,
    unlock::UnlockGate,
};

use crate::server::utils::{
    apply_set_cookie, build_content_disposition_header, cookie_value, file_unavailable_response,
    password_required_response, server_error_response, ContentDisposition,
};

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub checksum: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub downloads_remaining: Option<i64>,
}

impl FileInfo {
    fn from_record(record: FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.original_name,
            size_bytes: record.size_bytes,
            content_type: record.content_type,
            checksum: record.checksum,
            created_at: record.created_at,
            expires_at: record.expires_at,
            downloads_remaining: record.downloads_remaining,
        }
    }
}

/// GET /d/:id — public file info page; never consumes download quota.
pub async fn file_info_handler(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let now = OffsetDateTime::now_utc();
    let unlock_token = cookie_value(&headers, &UnlockGate::cookie_name(&file_id));

    match state
        .access()
        .file_page(&file_id, unlock_token.as_deref(), now)
        .await
    {
        Ok(PageVerdict::Ok(record)) => Json(FileInfo::from_record(record)).into_response(),
        Ok(PageVerdict::PasswordRequired) => password_required_response(),
        Ok(PageVerdict::ExpiredOrNotFound) => file_unavailable_response(),
        Err(err) => {
            error!(target: "files", %err, file_id = %file_id, "failed to authorize file page");
            server_error_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    password: String,
}

/// POST /d/:id — submit the file password; sets the scoped unlock cookie.
pub async fn submit_password_handler(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
    Form(form): Form<PasswordForm>,
) -> Response {
    let now = OffsetDateTime::now_utc();

    match state
        .access()
        .submit_password(&file_id, &form.password, now)
        .await
    {
        Ok(UnlockVerdict::Unlocked { record, cookie }) => {
            info!(target: "files", file_id = %record.id, "file unlocked with password");
            let mut response = StatusCode::NO_CONTENT.into_response();
            apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
            response
        }
        Ok(UnlockVerdict::IncorrectPassword) => {
            warn!(target: "files", file_id = %file_id, "incorrect file password submitted");
            (StatusCode::UNAUTHORIZED, "Incorrect password").into_response()
        }
        Ok(UnlockVerdict::ExpiredOrNotFound) => file_unavailable_response(),
        Err(err) => {
            error!(target: "files", %err, file_id = %file_id, "failed to process password submission");
            server_error_response()
        }
    }
}

/// GET /download/:id — the actual byte transfer; claims one download.
pub async fn download_handler(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let now = OffsetDateTime::now_utc();
    let unlock_token = cookie_value(&headers, &UnlockGate::cookie_name(&file_id));

    match state
        .access()
        .download(&file_id, unlock_token.as_deref(), now)
        .await
    {
        Ok(TransferVerdict::Allowed { record, remaining }) => {
            info!(
                target: "links",
                file_id = %record.id,
                remaining = ?remaining,
                "serving download"
            );
            serve_file_body(&state, &record, ContentDisposition::Attachment).await
        }
        Ok(TransferVerdict::PasswordRequired) => password_required_response(),
        Ok(TransferVerdict::ExpiredOrNotFound) => file_unavailable_response(),
        Err(err) => {
            error!(target: "links", %err, file_id = %file_id, "failed to authorize download");
            server_error_response()
        }
    }
}

/// GET /hotlink/:id — hotlink byte transfer.
///
/// An expired target answers exactly like an unknown hotlink.
pub async fn hotlink_handler(
    State(state): State<AppState>,
    AxumPath(hotlink_id): AxumPath<String>,
) -> Response {
    let now = OffsetDateTime::now_utc();

    match state.access().hotlink_download(&hotlink_id, now).await {
        Ok(TransferVerdict::Allowed { record, .. }) => {
            info!(target: "links", file_id = %record.id, "serving hotlink download");
            serve_file_body(&state, &record, ContentDisposition::Inline).await
        }
        Ok(TransferVerdict::PasswordRequired) | Ok(TransferVerdict::ExpiredOrNotFound) => {
            file_unavailable_response()
        }
        Err(err) => {
            error!(target: "links", %err, hotlink_id = %hotlink_id, "failed to authorize hotlink");
            server_error_response()
        }
    }
}

/// Stream the stored bytes with download headers.
async fn serve_file_body(
    state: &AppState,
    record: &FileRecord,
    mode: ContentDisposition,
) -> Response {
    if record.size_bytes < 0 {
        error!(
            target: "links",
            file_id = %record.id,
            size = record.size_bytes,
            "stored file size invalid during download"
        );
        return server_error_response();
    }

    let storage_path = state.config().storage.root.join(&record.stored_path);
    let file = match fs::File::open(&storage_path).await {
        Ok(file) => file,
        Err(err) => {
            error!(
                target: "links",
                %err,
                path = %storage_path.display(),
                file_id = %record.id,
                "failed to open file for download"
            );
            return file_unavailable_response();
        }
    };

    let guessed_type = record
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| {
            let guess = mime_guess::from_path(&record.original_name).first_or_octet_stream();
            HeaderValue::from_str(guess.essence_str())
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
        });

    let content_disposition = build_content_disposition_header(&record.original_name, mode);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, guessed_type);
    headers.insert(header::CONTENT_DISPOSITION, content_disposition);
    headers.insert(
        header::HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    let size_bytes = record.size_bytes as u64;
    if let Ok(value) = HeaderValue::from_str(&size_bytes.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }

    response
}
