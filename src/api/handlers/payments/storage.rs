//! Database helpers for transactions and enrollments.
//!
//! Expected tables: `payment_transactions` (reference unique, user_id,
//! course_id, amount_cents, currency, status, email, paid_at,
//! gateway_response jsonb) and `enrollments` with a unique
//! (user_id, course_id) constraint — that constraint is what makes the
//! redirect/webhook race safe.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::is_unique_violation;

/// One payment attempt as stored.
pub(super) struct TransactionRecord {
    pub(super) reference: String,
    pub(super) user_id: Uuid,
    pub(super) course_id: Uuid,
    pub(super) amount_cents: i64,
    pub(super) currency: String,
    pub(super) status: String,
}

/// Outcome of an enrollment insert; losing the race is a success.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum EnrollOutcome {
    Created,
    AlreadyEnrolled,
}

/// Record intent before the gateway is asked for a checkout page. If the
/// gateway call then fails, the row stays `pending` so a later webhook for
/// the same reference still has context to attach to.
pub(super) async fn insert_pending_transaction(
    pool: &PgPool,
    reference: &str,
    user_id: Uuid,
    course_id: Uuid,
    amount_cents: i64,
    currency: &str,
    email: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO payment_transactions
            (reference, user_id, course_id, amount_cents, currency, status, email)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(reference)
        .bind(user_id)
        .bind(course_id)
        .bind(amount_cents)
        .bind(currency)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert pending transaction")?;
    Ok(())
}

pub(super) async fn lookup_transaction(
    pool: &PgPool,
    reference: &str,
) -> Result<Option<TransactionRecord>> {
    let query = r"
        SELECT reference, user_id, course_id, amount_cents, currency, status
        FROM payment_transactions
        WHERE reference = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(reference)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup transaction")?;

    Ok(row.map(|row| TransactionRecord {
        reference: row.get("reference"),
        user_id: row.get("user_id"),
        course_id: row.get("course_id"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        status: row.get("status"),
    }))
}

/// Guarded transition to `completed`.
///
/// Only rows still `pending` move; concurrent completions from the redirect
/// and webhook paths collapse to one effective write. Returns whether this
/// caller performed the transition.
pub(super) async fn complete_transaction(
    pool: &PgPool,
    reference: &str,
    gateway_response: &Value,
) -> Result<bool> {
    let query = r"
        UPDATE payment_transactions
        SET status = 'completed',
            paid_at = NOW(),
            gateway_response = $2::jsonb
        WHERE reference = $1
          AND status = 'pending'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let payload = serde_json::to_string(gateway_response)
        .context("failed to serialize gateway response")?;
    let result = sqlx::query(query)
        .bind(reference)
        .bind(payload)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to complete transaction")?;
    Ok(result.rows_affected() > 0)
}

/// Guarded transition to `failed`; terminal states are never overwritten.
pub(super) async fn fail_transaction(
    pool: &PgPool,
    reference: &str,
    gateway_response: &Value,
) -> Result<bool> {
    let query = r"
        UPDATE payment_transactions
        SET status = 'failed',
            gateway_response = $2::jsonb
        WHERE reference = $1
          AND status = 'pending'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let payload = serde_json::to_string(gateway_response)
        .context("failed to serialize gateway response")?;
    let result = sqlx::query(query)
        .bind(reference)
        .bind(payload)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to fail transaction")?;
    Ok(result.rows_affected() > 0)
}

/// Create the transaction directly from webhook data, for the case where
/// the webhook outruns (or outlives) the redirect path. A concurrent insert
/// of the same reference is ignored.
pub(super) async fn insert_transaction_from_webhook(
    pool: &PgPool,
    reference: &str,
    user_id: Uuid,
    course_id: Uuid,
    amount_cents: i64,
    currency: &str,
    email: Option<&str>,
    gateway_response: &Value,
) -> Result<()> {
    let query = r"
        INSERT INTO payment_transactions
            (reference, user_id, course_id, amount_cents, currency, status, email,
             paid_at, gateway_response)
        VALUES ($1, $2, $3, $4, $5, 'completed', $6, NOW(), $7::jsonb)
        ON CONFLICT (reference) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let payload = serde_json::to_string(gateway_response)
        .context("failed to serialize gateway response")?;
    sqlx::query(query)
        .bind(reference)
        .bind(user_id)
        .bind(course_id)
        .bind(amount_cents)
        .bind(currency)
        .bind(email.unwrap_or_default())
        .bind(payload)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert transaction from webhook")?;
    Ok(())
}

pub(super) async fn is_enrolled(pool: &PgPool, user_id: Uuid, course_id: Uuid) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM enrollments
        WHERE user_id = $1
          AND course_id = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check enrollment")?;
    Ok(row.is_some())
}

/// Idempotent enrollment insert.
///
/// The unique (user_id, course_id) constraint turns the redirect/webhook
/// race into a harmless outcome: whoever loses sees the violation and
/// reports `AlreadyEnrolled` instead of an error.
pub(super) async fn create_enrollment(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    amount_paid_cents: i64,
) -> Result<EnrollOutcome> {
    let query = r"
        INSERT INTO enrollments (user_id, course_id, amount_paid_cents)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(course_id)
        .bind(amount_paid_cents)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(EnrollOutcome::Created),
        Err(err) if is_unique_violation(&err) => Ok(EnrollOutcome::AlreadyEnrolled),
        Err(err) => Err(err).context("failed to create enrollment"),
    }
}

#[cfg(test)]
mod tests {
    use super::{EnrollOutcome, TransactionRecord};
    use uuid::Uuid;

    #[test]
    fn enroll_outcome_variants_compare() {
        assert_eq!(EnrollOutcome::Created, EnrollOutcome::Created);
        assert_ne!(EnrollOutcome::Created, EnrollOutcome::AlreadyEnrolled);
    }

    #[test]
    fn transaction_record_holds_values() {
        let record = TransactionRecord {
            reference: "krs_ref".to_string(),
            user_id: Uuid::nil(),
            course_id: Uuid::nil(),
            amount_cents: 4999,
            currency: "USD".to_string(),
            status: "pending".to_string(),
        };
        assert_eq!(record.reference, "krs_ref");
        assert_eq!(record.amount_cents, 4999);
        assert_eq!(record.status, "pending");
    }
}
