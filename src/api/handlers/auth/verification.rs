//! Email verification endpoints.

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
use super::storage::{ResendOutcome, consume_verification_token, enqueue_resend_verification};
use super::types::{ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{hash_verification_token, normalize_email};

/// Verify the email link by consuming the hashed token and activating the user.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified; account active", body = ApiMessage),
        (status = 400, description = "Invalid/expired token", body = FieldErrors)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
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

    // Hash the token before lookup; raw tokens are never stored server-side.
    let token_hash = hash_verification_token(token);
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::err("Verification failed")),
            )
                .into_response();
        }
    };

    match consume_verification_token(&mut tx, &token_hash).await {
        Ok(true) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit verify-email transaction: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiMessage::err("Verification failed")),
                )
                    .into_response();
            }
            (
                StatusCode::OK,
                Json(ApiMessage::ok("Email verified. You can now log in.")),
            )
                .into_response()
        }
        Ok(false) => {
            let _ = tx.rollback().await;
            (
                StatusCode::BAD_REQUEST,
                Json(FieldErrors::single("token", "Invalid or expired token")),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to verify email: {err}");
            let _ = tx.rollback().await;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::err("Verification failed")),
            )
                .into_response()
        }
    }
}

/// Resend a verification email (always success-shaped to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Resend accepted", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    // Resend is intentionally opaque; every exit is the same 200 body.
    let accepted = (
        StatusCode::OK,
        Json(ApiMessage::ok(
            "If that email needs verification, a new link is on its way.",
        )),
    );

    let Some(Json(request)) = payload else {
        return accepted;
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return accepted;
    }

    match enqueue_resend_verification(&pool, &email, auth_state.config()).await {
        Ok(ResendOutcome::Queued | ResendOutcome::Cooldown | ResendOutcome::Noop) => accepted,
        Err(err) => {
            error!("Failed to enqueue resend verification: {err}");
            // Avoid leaking failures; the caller still sees success.
            accepted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::AuthConfig;
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(AuthConfig::new(
            "https://kurso.dev".to_string(),
        )))
    }

    #[tokio::test]
    async fn verify_email_missing_payload() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(Extension(pool), None).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_email_empty_token() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(
            Extension(pool),
            Some(Json(VerifyEmailRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_verification_is_success_shaped_without_payload() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn resend_verification_is_success_shaped_for_invalid_email() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResendVerificationRequest {
                email: "nope".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
