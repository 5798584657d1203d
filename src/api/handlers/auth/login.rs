//! Password login.
//!
//! Order matters here: the lockout check runs before any credential work,
//! and unknown-email and wrong-password failures are produced by the same
//! code path so their responses are byte-identical.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::handlers::{ApiMessage, FieldErrors, valid_email};

use super::session::session_cookie;
use super::state::AuthState;
use super::storage::{
    UserRecord, delete_expired_sessions, insert_session, lookup_user_by_email, update_last_login,
};
use super::throttle::{is_locked_out, record_attempt, remaining_lockout_seconds};
use super::types::LoginRequest;
use super::utils::{extract_client_ip, normalize_email, verify_dummy_password, verify_password};

/// Why a login was refused. Every variant maps to exactly one response
/// shape; credential failures intentionally carry no detail.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum LoginDenied {
    LockedOut { retry_after_seconds: i64 },
    InvalidCredentials,
    AccountNotActive { reason: &'static str },
}

pub(super) fn denied_response(denied: &LoginDenied) -> Response {
    match denied {
        LoginDenied::LockedOut {
            retry_after_seconds,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiMessage::err(format!(
                "Too many failed logins. Try again in {retry_after_seconds} seconds."
            ))),
        )
            .into_response(),
        LoginDenied::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            Json(ApiMessage::err("Invalid email or password")),
        )
            .into_response(),
        LoginDenied::AccountNotActive { reason } => {
            (StatusCode::FORBIDDEN, Json(ApiMessage::err(*reason))).into_response()
        }
    }
}

/// Per-status reason shown when a correctly-authenticated account cannot
/// log in. Unknown statuses fail closed.
pub(super) fn not_active_reason(status: &str) -> &'static str {
    match status {
        "pending" => "Please verify your email address before logging in",
        "suspended" => "Your account has been suspended",
        _ => "Your account is not active",
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = ApiMessage),
        (status = 400, description = "Validation error", body = FieldErrors),
        (status = 401, description = "Invalid credentials", body = ApiMessage),
        (status = 403, description = "Account not active", body = ApiMessage),
        (status = 429, description = "Locked out", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(FieldErrors::single("body", "Missing payload")),
            )
                .into_response();
        }
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single("email", "Invalid email")),
        )
            .into_response();
    }

    // Lockout is decided before credentials are even looked at, so a locked
    // address gets the same refusal for right and wrong passwords.
    match is_locked_out(&pool, &email, auth_state.config()).await {
        Ok(false) => {}
        Ok(true) => {
            let retry_after_seconds =
                match remaining_lockout_seconds(&pool, &email, auth_state.config()).await {
                    Ok(seconds) => seconds,
                    Err(err) => {
                        error!("Failed to compute lockout window: {err}");
                        auth_state.config().lockout_window_seconds()
                    }
                };
            return denied_response(&LoginDenied::LockedOut {
                retry_after_seconds,
            });
        }
        Err(err) => {
            error!("Failed to check lockout: {err}");
            return internal_error();
        }
    }

    let client_ip = extract_client_ip(&headers);
    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to lookup user: {err}");
            return internal_error();
        }
    };

    let Some(user) = user else {
        // Unknown email: burn comparable hashing work, then refuse exactly
        // like a wrong password would.
        verify_dummy_password(&request.password);
        return credential_failure(&pool, &email, client_ip.as_deref()).await;
    };

    let password_matches = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !password_matches {
        // OAuth-only accounts (no password hash) land here too.
        return credential_failure(&pool, &email, client_ip.as_deref()).await;
    }

    if user.status != "active" {
        return denied_response(&LoginDenied::AccountNotActive {
            reason: not_active_reason(&user.status),
        });
    }

    establish_session(
        &pool,
        &auth_state,
        &user,
        &email,
        client_ip.as_deref(),
        headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok()),
        request.remember,
    )
    .await
}

/// Record the failed attempt and produce the uniform credential refusal.
async fn credential_failure(pool: &PgPool, email: &str, client_ip: Option<&str>) -> Response {
    if let Err(err) = record_attempt(pool, email, client_ip, false).await {
        error!("Failed to record login attempt: {err}");
    }
    denied_response(&LoginDenied::InvalidCredentials)
}

async fn establish_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &UserRecord,
    email: &str,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
    remember: bool,
) -> Response {
    if let Err(err) = record_attempt(pool, email, client_ip, true).await {
        error!("Failed to record login attempt: {err}");
    }
    if let Err(err) = update_last_login(pool, user.id).await {
        error!("Failed to update last login: {err}");
    }
    // Cheap housekeeping while we are already writing to the sessions table.
    if let Err(err) = delete_expired_sessions(pool).await {
        error!("Failed to sweep expired sessions: {err}");
    }

    let ttl_seconds = auth_state.config().session_ttl_seconds(remember);
    let token = match insert_session(pool, user.id, client_ip, user_agent, ttl_seconds).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return internal_error();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state, &token, remember) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return internal_error();
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(ApiMessage::ok("Logged in")),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::err("Login failed")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::AuthConfig;
    use axum::body::to_bytes;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(AuthConfig::new(
            "https://kurso.dev".to_string(),
        )))
    }

    #[tokio::test]
    async fn login_missing_payload() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_invalid_email() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "not-an-email".to_string(),
                password: "whatever".to_string(),
                remember: false,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_responses_are_identical() -> anyhow::Result<()> {
        // Both failure paths funnel through the same LoginDenied variant, so
        // the serialized responses cannot diverge.
        let unknown_user = denied_response(&LoginDenied::InvalidCredentials);
        let wrong_password = denied_response(&LoginDenied::InvalidCredentials);

        assert_eq!(unknown_user.status(), wrong_password.status());
        assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);

        let first = to_bytes(unknown_user.into_body(), usize::MAX).await?;
        let second = to_bytes(wrong_password.into_body(), usize::MAX).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn lockout_response_mentions_retry_time_only() -> anyhow::Result<()> {
        let response = denied_response(&LoginDenied::LockedOut {
            retry_after_seconds: 540,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("540"));
        // No attempt counts in the message.
        assert!(!text.contains("attempt"));
        Ok(())
    }

    #[test]
    fn not_active_reasons_are_distinct() {
        let pending = not_active_reason("pending");
        let suspended = not_active_reason("suspended");
        let inactive = not_active_reason("inactive");
        assert_ne!(pending, suspended);
        assert_ne!(suspended, inactive);
        assert_ne!(pending, inactive);
        // Unknown statuses fail closed with the generic reason.
        assert_eq!(not_active_reason("weird"), inactive);
    }
}
