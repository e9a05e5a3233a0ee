use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    access::LoginVerdict, app_state::AppState, auth::randomized_backoff,
    rate_limit::RateLimitError,
};

use crate::server::utils::{
    apply_set_cookie, attach_retry_after, cookie_value, server_error_response,
};

const INVALID_CREDENTIALS_MESSAGE: &str = "Incorrect username or password";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

/// POST /login — check admin credentials and open a session.
pub async fn login_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Form(form): Form<LoginForm>,
) -> Response {
    let client_ip = addr.ip();

    if let Err(err) = state.login_rate_limiter().check_ip(client_ip) {
        warn!(target: "auth", ip = %client_ip, %err, "rate limited login by IP");
        return rate_limited_login_response(&err);
    }

    let username = form.username.trim();

    if let Err(err) = state.login_rate_limiter().check_username(username) {
        warn!(target: "auth", username = %username, %err, "rate limited login by username");
        return rate_limited_login_response(&err);
    }

    let now = OffsetDateTime::now_utc();

    let verdict = match state.access().login(username, &form.password, now).await {
        Ok(verdict) => verdict,
        Err(err) => {
            error!(target: "auth", %err, "error verifying login credentials");
            return server_error_response();
        }
    };

    match verdict {
        LoginVerdict::LoggedIn { cookie } => {
            info!(target: "auth", ip = %client_ip, "administrator logged in");
            let mut response = StatusCode::NO_CONTENT.into_response();
            apply_set_cookie(&mut response, &cookie, now, state.config().security.cookie_secure);
            response
        }
        LoginVerdict::IncorrectCredentials => {
            warn!(target: "auth", ip = %client_ip, "failed login attempt");
            randomized_backoff().await;
            (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS_MESSAGE).into_response()
        }
    }
}

/// POST /logout — invalidate the session and clear its cookie.
pub async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let now = OffsetDateTime::now_utc();
    let token = cookie_value(&headers, &state.config().session.cookie_name);

    let clearing = match state.access().logout(token.as_deref()).await {
        Ok(cookie) => cookie,
        Err(err) => {
            error!(target: "auth", %err, "failed to invalidate session on logout");
            return server_error_response();
        }
    };

    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_set_cookie(&mut response, &clearing, now, state.config().security.cookie_secure);
    response
}

fn rate_limited_login_response(error: &RateLimitError) -> Response {
    let message = match error {
        RateLimitError::Ip(_) => {
            "Too many login attempts from this IP address. Please wait and try again."
        }
        RateLimitError::Username(_) => {
            "Too many login attempts for this username. Please wait before trying again."
        }
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, message).into_response();
    attach_retry_after(&mut response, error.retry_after().as_secs());
    response
}
