//! Redirect-return verification.
//!
//! The user lands back from the gateway with a reference; we ask the
//! gateway what really happened and reconcile. Safe to call repeatedly:
//! a transaction that is already `completed` short-circuits to the view
//! (re-ensuring enrollment) without another status transition.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::handlers::ApiMessage;

use super::state::PaymentsState;
use super::storage::{
    TransactionRecord, complete_transaction, create_enrollment, fail_transaction,
    lookup_transaction,
};
use super::types::{TransactionView, VerifyResponse};

fn view(record: &TransactionRecord, status: &str) -> TransactionView {
    TransactionView {
        reference: record.reference.clone(),
        status: status.to_string(),
        course_id: record.course_id,
        amount_cents: record.amount_cents,
        currency: record.currency.clone(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/payments/verify/{reference}",
    params(
        ("reference" = String, Path, description = "Transaction reference")
    ),
    responses(
        (status = 200, description = "Transaction reconciled", body = VerifyResponse),
        (status = 404, description = "Unknown reference", body = ApiMessage),
        (status = 502, description = "Gateway failure", body = ApiMessage),
        (status = 503, description = "Payments not configured", body = ApiMessage)
    ),
    tag = "payments"
)]
pub async fn verify(
    Path(reference): Path<String>,
    pool: Extension<PgPool>,
    payments_state: Extension<Arc<PaymentsState>>,
) -> impl IntoResponse {
    let Some((config, gateway)) = payments_state.parts() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiMessage::err("Payments are not configured")),
        )
            .into_response();
    };

    let record = match lookup_transaction(&pool, &reference).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiMessage::err("Unknown transaction reference")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to lookup transaction: {err}");
            return internal_error();
        }
    };

    // Re-verifying a finished transaction must not double-enroll or error.
    if record.status == "completed" {
        ensure_enrollment(&pool, &record).await;
        return success_response(&record);
    }
    if record.status == "failed" {
        return failure_response(&record);
    }

    let verification = match gateway.verify_transaction(config, &reference).await {
        Ok(verification) => verification,
        Err(err) => {
            error!("Gateway verify failed for {reference}: {err}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ApiMessage::err(
                    "Could not confirm the payment. Please try again.",
                )),
            )
                .into_response();
        }
    };

    if verification.success {
        // The CAS may lose to a concurrent webhook; enrollment is ensured
        // either way.
        match complete_transaction(&pool, &reference, &verification.raw).await {
            Ok(_) => {}
            Err(err) => {
                error!("Failed to complete transaction {reference}: {err}");
                return internal_error();
            }
        }
        ensure_enrollment(&pool, &record).await;
        success_response(&record)
    } else {
        if let Err(err) = fail_transaction(&pool, &reference, &verification.raw).await {
            error!("Failed to mark transaction {reference} failed: {err}");
            return internal_error();
        }
        failure_response(&record)
    }
}

/// Enrollment failures are logged, not surfaced: the transaction is already
/// completed and a retry path exists through re-verification.
async fn ensure_enrollment(pool: &PgPool, record: &TransactionRecord) {
    if let Err(err) =
        create_enrollment(pool, record.user_id, record.course_id, record.amount_cents).await
    {
        error!(
            "Failed to ensure enrollment for {}: {err}",
            record.reference
        );
    }
}

fn success_response(record: &TransactionRecord) -> Response {
    (
        StatusCode::OK,
        Json(VerifyResponse {
            success: true,
            message: "Payment confirmed".to_string(),
            transaction: view(record, "completed"),
        }),
    )
        .into_response()
}

fn failure_response(record: &TransactionRecord) -> Response {
    (
        StatusCode::OK,
        Json(VerifyResponse {
            success: false,
            message: "Payment was not successful".to_string(),
            transaction: view(record, "failed"),
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::err("Verification failed")),
    )
        .into_response()
}
