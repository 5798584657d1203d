//! Payment initialization (checkout start).

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use ulid::Ulid;

use crate::api::handlers::{ApiMessage, FieldErrors, auth};

use super::state::PaymentsState;
use super::storage::{insert_pending_transaction, is_enrolled};
use super::types::{InitializeRequest, InitializeResponse};

/// Gateway-facing reference for one payment attempt; ULIDs keep it unique
/// and sortable in gateway dashboards.
fn new_reference() -> String {
    format!("krs_{}", Ulid::new().to_string().to_lowercase())
}

#[utoipa::path(
    post,
    path = "/v1/payments/initialize",
    request_body = InitializeRequest,
    responses(
        (status = 200, description = "Checkout created", body = InitializeResponse),
        (status = 400, description = "Validation error", body = FieldErrors),
        (status = 401, description = "Not logged in", body = ApiMessage),
        (status = 409, description = "Already enrolled", body = ApiMessage),
        (status = 502, description = "Gateway failure", body = ApiMessage),
        (status = 503, description = "Payments not configured", body = ApiMessage)
    ),
    tag = "payments"
)]
pub async fn initialize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<auth::AuthState>>,
    payments_state: Extension<Arc<PaymentsState>>,
    payload: Option<Json<InitializeRequest>>,
) -> impl IntoResponse {
    let Some((config, gateway)) = payments_state.parts() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiMessage::err("Payments are not configured")),
        )
            .into_response();
    };

    let user = match auth::session::authenticate_session(&headers, &pool).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiMessage::err("Log in to purchase a course")),
            )
                .into_response();
        }
        Err(status) => return status.into_response(),
    };

    let request: InitializeRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(FieldErrors::single("body", "Missing payload")),
            )
                .into_response();
        }
    };

    if request.amount_cents <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(FieldErrors::single("amount_cents", "Amount must be positive")),
        )
            .into_response();
    }

    match is_enrolled(&pool, user.user_id, request.course_id).await {
        Ok(false) => {}
        Ok(true) => {
            return (
                StatusCode::CONFLICT,
                Json(ApiMessage::err("You are already enrolled in this course")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to check enrollment: {err}");
            return internal_error();
        }
    }

    // Intent is recorded before the gateway call: if the gateway then fails,
    // the pending row remains and a later webhook can still attach to it.
    let reference = new_reference();
    if let Err(err) = insert_pending_transaction(
        &pool,
        &reference,
        user.user_id,
        request.course_id,
        request.amount_cents,
        config.currency(),
        &user.email,
    )
    .await
    {
        error!("Failed to record pending transaction: {err}");
        return internal_error();
    }

    let callback_url = format!(
        "{}/payments/callback",
        auth_state.config().frontend_base_url().trim_end_matches('/')
    );
    let redirect_url = match gateway
        .initialize_transaction(
            config,
            &reference,
            &user.email,
            request.amount_cents,
            &callback_url,
            user.user_id,
            request.course_id,
        )
        .await
    {
        Ok(url) => url,
        Err(err) => {
            // The pending row intentionally survives this failure.
            error!("Gateway initialize failed for {reference}: {err}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ApiMessage::err(
                    "Could not start the payment. Please try again.",
                )),
            )
                .into_response();
        }
    };

    (
        StatusCode::OK,
        Json(InitializeResponse {
            success: true,
            message: "Checkout created".to_string(),
            redirect_url,
            reference,
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::err("Payment initialization failed")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{AuthConfig, AuthState};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(AuthConfig::new(
            "https://kurso.dev".to_string(),
        )))
    }

    fn configured_payments() -> anyhow::Result<Arc<PaymentsState>> {
        Ok(Arc::new(PaymentsState::new(Some(
            super::super::PaymentsConfig::new(
                "https://api.gateway.test".to_string(),
                SecretString::from("sk_test_secret".to_string()),
            ),
        ))?))
    }

    #[test]
    fn references_are_unique_and_prefixed() {
        let first = new_reference();
        let second = new_reference();
        assert!(first.starts_with("krs_"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn initialize_unconfigured_is_unavailable() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let payments = Arc::new(PaymentsState::new(None)?);
        let response = initialize(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Extension(payments),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn initialize_without_session_is_unauthorized() -> anyhow::Result<()> {
        // No cookie at all: authenticate_session resolves to None without
        // touching the database.
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = initialize(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Extension(configured_payments()?),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
