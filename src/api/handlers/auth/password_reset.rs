//! Password reset endpoints.
//!
//! The forgot endpoint is success-shaped whether or not the address is
//! registered; the reset endpoint consumes the token and sets the new
//! password in one transaction, so a replayed token cannot win twice.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::handlers::{ApiMessage, FieldErrors, valid_email};

use super::state::AuthState;
use super::storage::{consume_reset_and_set_password, enqueue_password_reset};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{hash_password, hash_reset_token, normalize_email, valid_password};

#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email queued if the account exists", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    // Every exit from this handler is the same 200 body. Whether the email
    // exists, is malformed, or storage hiccups, the caller learns nothing.
    let accepted = (
        StatusCode::OK,
        Json(ApiMessage::ok(
            "If that email is registered, a reset link is on its way.",
        )),
    );

    let Some(Json(request)) = payload else {
        return accepted;
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return accepted;
    }

    if let Err(err) = enqueue_password_reset(&pool, &email, auth_state.config()).await {
        error!("Failed to enqueue password reset: {err}");
    }

    accepted
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = ApiMessage),
        (status = 400, description = "Validation error or invalid/expired token", body = FieldErrors)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(FieldErrors::single("body", "Missing payload")),
            )
                .into_response();
        }
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single("token", "Missing token")),
        )
            .into_response();
    }
    if request.password != request.password_confirmation {
        return (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single(
                "password_confirmation",
                "Passwords do not match",
            )),
        )
            .into_response();
    }
    if !valid_password(&request.password) {
        return (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single(
                "password",
                "Password must be at least 8 characters",
            )),
        )
            .into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::err("Password reset failed")),
            )
                .into_response();
        }
    };

    // Lookup is by hash; the raw token never reaches the database.
    let token_hash = hash_reset_token(token);
    match consume_reset_and_set_password(&pool, &token_hash, &password_hash).await {
        Ok(true) => (
            StatusCode::OK,
            Json(ApiMessage::ok("Password updated. You can now log in.")),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single("token", "Invalid or expired token")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to reset password: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::err("Password reset failed")),
            )
                .into_response()
        }
    }
}
