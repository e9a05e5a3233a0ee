use axum::extract::multipart::{Field, Multipart};
use axum::{
    extract::multipart::MultipartError,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::{
    app_state::AppState,
    auth,
    files::NewFile,
    server::constants::MAX_FILE_PASSWORD_LENGTH,
};

use crate::server::handlers::admin::require_admin;
use crate::server::utils::{apply_set_cookie, sanitize_filename, server_error_response};

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub result: &'static str,
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub expires_at: Option<i64>,
    pub downloads_remaining: Option<i64>,
    pub hotlink_id: Option<String>,
}

/// POST /upload — admin-only multipart file upload.
///
/// Besides the `file` part, the form may carry `expires_in` (hours, 0 means
/// never), `downloads` (limit, 0 means unlimited), `password`, and `hotlink`.
pub async fn upload_submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let now = OffsetDateTime::now_utc();

    let refreshed = match require_admin(&state, &headers, now).await {
        Ok(refreshed) => refreshed,
        Err(response) => return response,
    };

    let storage_root = state.config().storage.root.clone();
    let max_file_size = state.config().storage.max_file_size_bytes;

    let mut expires_in_hours: Option<u64> = None;
    let mut download_limit: Option<u64> = None;
    let mut password: Option<String> = None;
    let mut hotlink_requested = false;
    let mut uploaded_file: Option<PersistedUpload> = None;

    loop {
        let next_field = match multipart.next_field().await {
            Ok(field) => field,
            Err(err) => {
                warn!(target: "upload", %err, "malformed multipart payload");
                if let Some(upload) = uploaded_file {
                    discard_upload(&upload).await;
                }
                return (
                    StatusCode::BAD_REQUEST,
                    "The upload form could not be processed. Please try again.",
                )
                    .into_response();
            }
        };

        let Some(field) = next_field else {
            break;
        };

        let field_name = field.name().map(|name| name.to_string());
        match field_name.as_deref() {
            Some("file") => {
                if uploaded_file.is_some() {
                    return (
                        StatusCode::BAD_REQUEST,
                        "Only one file can be uploaded at a time.",
                    )
                        .into_response();
                }

                match persist_streamed_file(field, &storage_root, max_file_size).await {
                    Ok(file) => {
                        uploaded_file = Some(file);
                    }
                    Err(UploadStreamError::TooLarge { limit }) => {
                        warn!(target: "upload", limit, "rejected upload exceeding the size limit");
                        return (
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "The uploaded file exceeds the size limit.",
                        )
                            .into_response();
                    }
                    Err(UploadStreamError::EmptyUpload) => {
                        return (
                            StatusCode::UNPROCESSABLE_ENTITY,
                            "Select a file before uploading.",
                        )
                            .into_response();
                    }
                    Err(UploadStreamError::Multipart(err)) => {
                        warn!(target: "upload", %err, "failed to read upload chunks");
                        return (
                            StatusCode::BAD_REQUEST,
                            "The file upload could not be read. Please try again.",
                        )
                            .into_response();
                    }
                    Err(UploadStreamError::Io(err)) => {
                        error!(target: "upload", %err, "failed to persist uploaded file");
                        return server_error_response();
                    }
                }
            }
            Some("expires_in") => match read_numeric_field(field).await {
                Ok(value) => expires_in_hours = value,
                Err(response) => return response,
            },
            Some("downloads") => match read_numeric_field(field).await {
                Ok(value) => download_limit = value,
                Err(response) => return response,
            },
            Some("password") => match field.text().await {
                Ok(value) => {
                    let trimmed = value.trim().to_string();
                    if !trimmed.is_empty() {
                        password = Some(trimmed);
                    }
                }
                Err(err) => {
                    warn!(target: "upload", %err, "failed to read password field");
                    return (
                        StatusCode::BAD_REQUEST,
                        "Unable to read the password value.",
                    )
                        .into_response();
                }
            },
            Some("hotlink") => match field.text().await {
                Ok(value) => {
                    let normalized = value.trim().to_ascii_lowercase();
                    hotlink_requested = matches!(normalized.as_str(), "true" | "1" | "on");
                }
                Err(err) => {
                    warn!(target: "upload", %err, "failed to read hotlink field");
                    return (StatusCode::BAD_REQUEST, "Unable to read the hotlink flag.")
                        .into_response();
                }
            },
            _ => {
                if let Err(err) = field.text().await {
                    debug!(
                        target: "upload",
                        field = field_name.as_deref().unwrap_or(""),
                        %err,
                        "discarding unexpected multipart field"
                    );
                }
            }
        }
    }

    let Some(upload) = uploaded_file else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Select a file before uploading.",
        )
            .into_response();
    };

    let max_expiration = state.config().defaults.max_expiration_hours;
    let expiration_hours = match expires_in_hours {
        Some(hours) if hours > max_expiration => {
            discard_upload(&upload).await;
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Expiration exceeds the configured maximum.",
            )
                .into_response();
        }
        Some(hours) => hours,
        None => state.config().defaults.file_expiration_hours,
    };

    // Zero hours means the file never expires by time.
    let expires_at = if expiration_hours == 0 {
        None
    } else {
        upload
            .completed_at
            .checked_add(TimeDuration::hours(expiration_hours as i64))
            .map(|dt| dt.unix_timestamp())
    };

    // Zero downloads means unlimited.
    let downloads_remaining = match download_limit {
        Some(0) => None,
        Some(limit) => Some(limit as i64),
        None => Some(state.config().defaults.download_limit as i64),
    };

    if password.is_some() && hotlink_requested {
        discard_upload(&upload).await;
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Password-protected files cannot be hotlinked.",
        )
            .into_response();
    }

    let password_hash = match password.as_deref() {
        Some(submitted) if submitted.len() > MAX_FILE_PASSWORD_LENGTH => {
            discard_upload(&upload).await;
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                "The file password is too long.",
            )
                .into_response();
        }
        Some(submitted) => match auth::hash_password(submitted).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!(target: "upload", %err, "failed to hash file password");
                discard_upload(&upload).await;
                return server_error_response();
            }
        },
        None => None,
    };

    let size_bytes = match i64::try_from(upload.size_bytes) {
        Ok(value) => value,
        Err(_) => {
            error!(target: "upload", size = upload.size_bytes, "uploaded file size exceeds supported range");
            discard_upload(&upload).await;
            return server_error_response();
        }
    };

    let new_file = NewFile {
        original_name: &upload.original_name,
        stored_path: &upload.storage_key,
        size_bytes,
        content_type: upload.content_type.as_deref(),
        checksum: &upload.checksum_hex,
        password_hash: password_hash.as_deref(),
        created_at: upload.completed_at.unix_timestamp(),
        expires_at,
        downloads_remaining,
    };

    let record = match state.access().files().create(&new_file).await {
        Ok(record) => record,
        Err(err) => {
            error!(target: "files", %err, "failed to persist uploaded file record");
            discard_upload(&upload).await;
            return server_error_response();
        }
    };

    let hotlink_id = if hotlink_requested {
        match state.access().hotlinks().register(&record.id).await {
            Ok(hotlink_id) => hotlink_id,
            Err(err) => {
                error!(target: "links", %err, file_id = %record.id, "failed to register hotlink");
                None
            }
        }
    } else {
        None
    };

    info!(
        target: "upload",
        file_id = %record.id,
        size_bytes = upload.size_bytes,
        protected = record.password_hash.is_some(),
        hotlink = hotlink_id.is_some(),
        "file uploaded successfully"
    );

    let body = UploadResult {
        result: "OK",
        id: record.id,
        name: record.original_name,
        size_bytes: record.size_bytes,
        checksum: record.checksum,
        expires_at: record.expires_at,
        downloads_remaining: record.downloads_remaining,
        hotlink_id,
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Some(cookie) = refreshed {
        apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
    }
    response
}

async fn read_numeric_field(field: Field<'_>) -> Result<Option<u64>, Response> {
    let value = match field.text().await {
        Ok(value) => value,
        Err(err) => {
            warn!(target: "upload", %err, "failed to read numeric form field");
            return Err(
                (StatusCode::BAD_REQUEST, "Unable to read a form field.").into_response()
            );
        }
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match trimmed.parse::<u64>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Numeric form fields must be whole numbers.",
        )
            .into_response()),
    }
}

async fn persist_streamed_file(
    mut field: Field<'_>,
    storage_root: &std::path::Path,
    max_file_size: u64,
) -> Result<PersistedUpload, UploadStreamError> {
    let started_at = OffsetDateTime::now_utc();
    let original_name = sanitize_filename(field.file_name());
    let content_type = field.content_type().map(|mime| mime.to_string());
    let storage_id = Ulid::new().to_string();

    let date_path = format!(
        "{:04}/{:02}/{:02}",
        started_at.year(),
        u8::from(started_at.month()),
        started_at.day()
    );

    let final_dir = storage_root.join(&date_path);
    fs::create_dir_all(&final_dir)
        .await
        .map_err(UploadStreamError::Io)?;

    let temp_path = final_dir.join(format!("{}.uploading", storage_id));
    let final_path = final_dir.join(&storage_id);

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(UploadStreamError::Io)?;
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    let mut saw_data = false;

    while let Some(chunk) = field.chunk().await.map_err(UploadStreamError::Multipart)? {
        if chunk.is_empty() {
            continue;
        }

        saw_data = true;
        bytes_written = bytes_written.saturating_add(chunk.len() as u64);
        if bytes_written > max_file_size {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(UploadStreamError::TooLarge {
                limit: max_file_size,
            });
        }

        if let Err(err) = file.write_all(&chunk).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(UploadStreamError::Io(err));
        }

        hasher.update(&chunk);
    }

    if let Err(err) = file.flush().await {
        drop(file);
        let _ = fs::remove_file(&temp_path).await;
        return Err(UploadStreamError::Io(err));
    }
    drop(file);

    if !saw_data {
        let _ = fs::remove_file(&temp_path).await;
        return Err(UploadStreamError::EmptyUpload);
    }

    if let Err(err) = fs::rename(&temp_path, &final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(UploadStreamError::Io(err));
    }

    let completed_at = OffsetDateTime::now_utc();
    let storage_key = format!("{}/{}", date_path, storage_id);
    let checksum_hex = format!("{:x}", hasher.finalize());

    Ok(PersistedUpload {
        storage_key,
        absolute_path: final_path,
        original_name,
        size_bytes: bytes_written,
        content_type,
        checksum_hex,
        completed_at,
    })
}

/// Remove stored bytes for an upload that will not get a database record.
async fn discard_upload(upload: &PersistedUpload) {
    match fs::remove_file(&upload.absolute_path).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(
                target: "upload",
                path = %upload.absolute_path.display(),
                %err,
                "failed to remove orphaned upload from disk"
            );
        }
    }
}

#[derive(Debug)]
struct PersistedUpload {
    storage_key: String,
    absolute_path: std::path::PathBuf,
    original_name: String,
    size_bytes: u64,
    content_type: Option<String>,
    checksum_hex: String,
    completed_at: OffsetDateTime,
}

#[derive(Debug)]
enum UploadStreamError {
    Io(std::io::Error),
    Multipart(MultipartError),
    TooLarge { limit: u64 },
    EmptyUpload,
}
