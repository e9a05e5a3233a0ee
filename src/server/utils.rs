use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::Path;
use time::OffsetDateTime;

use crate::access::SetCookie;

/// Read a named cookie from the request's Cookie header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;

    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim().to_string())
    })
}

/// Render a [`SetCookie`] value object into a `Set-Cookie` header value.
///
/// Expiry becomes a Max-Age relative to `now`; a past expiry clears the
/// cookie with Max-Age=0.
pub fn build_set_cookie_header(
    cookie: &SetCookie,
    now: OffsetDateTime,
    secure: bool,
) -> Option<HeaderValue> {
    let mut value = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        cookie.name, cookie.value
    );

    if let Some(expires_at) = cookie.expires_at {
        let max_age = (expires_at - now).whole_seconds().max(0);
        value.push_str(&format!("; Max-Age={max_age}"));
    }

    if secure {
        value.push_str("; Secure");
    }

    HeaderValue::from_str(&value).ok()
}

/// Append a cookie produced by the access core to a response.
pub fn apply_set_cookie(
    response: &mut Response,
    cookie: &SetCookie,
    now: OffsetDateTime,
    secure: bool,
) {
    if let Some(value) = build_set_cookie_header(cookie, now, secure) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// Produce a filesystem-safe file name, falling back to a default when necessary.
pub fn sanitize_filename(raw: Option<&str>) -> String {
    const FALLBACK: &str = "upload.bin";
    let Some(name) = raw else {
        return FALLBACK.to_string();
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return FALLBACK.to_string();
    }

    let candidate = Path::new(trimmed)
        .file_name()
        .and_then(|segment| segment.to_str())
        .unwrap_or(FALLBACK);

    let cleaned: String = candidate.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return FALLBACK.to_string();
    }

    cleaned.chars().take(255).collect()
}

/// Desired presentation mode for `Content-Disposition` headers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContentDisposition {
    Attachment,
    Inline,
}

/// Build a Content-Disposition header value with ASCII fallback and optional inline behaviour.
pub fn build_content_disposition_header(filename: &str, mode: ContentDisposition) -> HeaderValue {
    let mut fallback = String::with_capacity(filename.len());
    let mut contains_non_ascii = false;

    for ch in filename.chars() {
        if matches!(ch, ' '..='~') && ch != '"' && ch != '\\' {
            fallback.push(ch);
        } else {
            contains_non_ascii |= !ch.is_ascii();
            fallback.push('_');
        }
    }

    if fallback.is_empty() {
        fallback.push_str("download.bin");
    }

    if fallback.len() > 255 {
        fallback.truncate(255);
    }

    let truncated_original: String = filename.chars().take(255).collect();
    let needs_extended = contains_non_ascii || truncated_original.len() != filename.len();

    let disposition = match mode {
        ContentDisposition::Attachment => "attachment",
        ContentDisposition::Inline => "inline",
    };

    let header_value = if needs_extended {
        let encoded = encode_filename_for_rfc5987(&truncated_original);
        format!("{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
    } else {
        format!("{disposition}; filename=\"{fallback}\"")
    };

    let fallback_header = match mode {
        ContentDisposition::Attachment => HeaderValue::from_static("attachment"),
        ContentDisposition::Inline => HeaderValue::from_static("inline"),
    };

    HeaderValue::from_str(&header_value).unwrap_or(fallback_header)
}

/// Percent-encode a filename for RFC 5987 usage.
pub fn encode_filename_for_rfc5987(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());

    for byte in input.as_bytes() {
        match *byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => encoded.push(*byte as char),
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{:02X}", byte));
            }
        }
    }

    encoded
}

/// Canonical application server error response body.
pub fn server_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unable to process your request. Please try again later.",
    )
        .into_response()
}

/// Shared response for expired and unknown files.
///
/// The two cases are deliberately indistinguishable from the outside.
pub fn file_unavailable_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        "This file is no longer available or does not exist.",
    )
        .into_response()
}

/// Response for admin routes without a valid session.
pub fn unauthenticated_response() -> Response {
    (StatusCode::UNAUTHORIZED, "Not authenticated").into_response()
}

/// Response when a protected file is accessed without a valid unlock cookie.
pub fn password_required_response() -> Response {
    (StatusCode::UNAUTHORIZED, "Password required").into_response()
}

/// Convenience for attaching a `Retry-After` header to rate-limited responses.
pub fn attach_retry_after(response: &mut Response, seconds: u64) {
    if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
}
