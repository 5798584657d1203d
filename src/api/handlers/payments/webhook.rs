//! Gateway webhook handling.
//!
//! The signature gate is absolute: the HMAC-SHA-512 of the raw body bytes
//! must match the header before anything is parsed or written, and the
//! comparison is constant-time. Once the signature passes, the handler
//! always acknowledges with 200 — a non-200 would make the gateway retry
//! and storm us with duplicates; idempotent reconciliation is what makes
//! swallowing internal errors safe.

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha512;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::state::PaymentsState;
use super::storage::{
    complete_transaction, create_enrollment, insert_transaction_from_webhook, lookup_transaction,
};

/// Header carrying the hex HMAC-SHA-512 of the raw request body.
pub(super) const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha512 = Hmac<Sha512>;

#[derive(Deserialize, Debug)]
struct WebhookEvent {
    event: String,
    data: Option<ChargeData>,
}

#[derive(Deserialize, Debug)]
struct ChargeData {
    reference: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    customer: Option<Customer>,
    metadata: Option<Metadata>,
}

#[derive(Deserialize, Debug)]
struct Customer {
    email: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Metadata {
    user_id: Option<String>,
    course_id: Option<String>,
}

/// Everything needed to reconcile one successful charge.
#[derive(Debug, PartialEq, Eq)]
struct ChargeSuccess {
    reference: String,
    user_id: Uuid,
    course_id: Uuid,
    amount_cents: i64,
    currency: String,
    email: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/payments/webhook",
    request_body = Vec<u8>,
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 503, description = "Payments not configured")
    ),
    tag = "payments"
)]
pub async fn webhook(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    payments_state: Extension<Arc<PaymentsState>>,
    body: Bytes,
) -> StatusCode {
    let Some((config, _gateway)) = payments_state.parts() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    // Authenticity first: nothing is parsed, logged in detail, or written
    // until the raw bytes check out against the shared secret.
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("Webhook rejected: missing signature header");
        return StatusCode::UNAUTHORIZED;
    };

    let secret = config.secret_key().expose_secret();
    if !verify_signature(secret.as_bytes(), &body, signature) {
        warn!("Webhook rejected: signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    // From here on the gateway always gets a 200; failures are ours to log.
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            error!("Webhook body unparseable: {err}");
            return StatusCode::OK;
        }
    };

    if event.event != "charge.success" {
        info!(event = %event.event, "Webhook event ignored");
        return StatusCode::OK;
    }

    let charge = match extract_charge(event) {
        Ok(charge) => charge,
        Err(missing) => {
            error!("charge.success missing field: {missing}");
            return StatusCode::OK;
        }
    };

    if let Err(err) = process_charge_success(&pool, &charge, &body).await {
        error!(
            "Webhook processing failed for {}: {err}",
            charge.reference
        );
    }

    StatusCode::OK
}

/// Hex HMAC-SHA-512 over the raw body with the gateway's shared secret.
fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts any key length; this arm is unreachable in practice.
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison against the expected signature.
fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let expected = compute_signature(secret, body);
    !expected.is_empty() && constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn extract_charge(event: WebhookEvent) -> Result<ChargeSuccess, &'static str> {
    let data = event.data.ok_or("data")?;
    let reference = data
        .reference
        .filter(|reference| !reference.is_empty())
        .ok_or("reference")?;
    let metadata = data.metadata.ok_or("metadata")?;
    let user_id = metadata
        .user_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or("metadata.user_id")?;
    let course_id = metadata
        .course_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or("metadata.course_id")?;
    let amount_cents = data.amount.ok_or("amount")?;

    Ok(ChargeSuccess {
        reference,
        user_id,
        course_id,
        amount_cents,
        currency: data.currency.unwrap_or_else(|| "USD".to_string()),
        email: data.customer.and_then(|customer| customer.email),
    })
}

/// Reconcile a successful charge with whatever state we already hold.
///
/// Three cases: no row yet (webhook outran the redirect path — create it
/// completed), row already completed (duplicate delivery — fall through),
/// row pending/failed (guarded CAS to completed). All three end by ensuring
/// the enrollment exists, which is idempotent.
async fn process_charge_success(
    pool: &PgPool,
    charge: &ChargeSuccess,
    raw_body: &[u8],
) -> anyhow::Result<()> {
    let raw = serde_json::from_slice::<serde_json::Value>(raw_body)
        .unwrap_or(serde_json::Value::Null);

    match lookup_transaction(pool, &charge.reference).await? {
        None => {
            insert_transaction_from_webhook(
                pool,
                &charge.reference,
                charge.user_id,
                charge.course_id,
                charge.amount_cents,
                &charge.currency,
                charge.email.as_deref(),
                &raw,
            )
            .await?;
        }
        Some(record) if record.status == "completed" => {
            // Duplicate delivery; enrollment idempotence does the rest.
        }
        Some(_) => {
            let _ = complete_transaction(pool, &charge.reference, &raw).await?;
        }
    }

    create_enrollment(pool, charge.user_id, charge.course_id, charge.amount_cents).await?;
    Ok(())
}
