//! Login-attempt throttle.
//!
//! Attempts are appended to `login_attempts` (email, ip, success,
//! attempted_at) and never updated. Lockout is computed, not stored: an
//! email is locked out while the count of failed attempts within the
//! trailing window reaches the threshold, and the clock restarts from the
//! most recent failure.
//!
//! The throttle is keyed by email rather than client IP, so distributing an
//! attack across addresses does not help. The trade-off is that anyone who
//! knows a victim's email can lock that account's logins for the window;
//! that is accepted here.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use crate::api::handlers::now_unix_seconds;

use super::state::AuthConfig;

/// Append one attempt row; success rows never count toward lockout.
pub(super) async fn record_attempt(
    pool: &PgPool,
    email: &str,
    ip: Option<&str>,
    success: bool,
) -> Result<()> {
    let query = r"
        INSERT INTO login_attempts (email, ip, success)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(ip)
        .bind(success)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record login attempt")?;
    Ok(())
}

pub(super) async fn is_locked_out(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<bool> {
    let failed = failed_attempts_in_window(pool, email, config.lockout_window_seconds()).await?;
    Ok(failed >= config.lockout_threshold())
}

/// Seconds until the lockout clears, floored at zero.
///
/// Measured from the most recent failed attempt, so continued failures keep
/// pushing the unlock time out.
pub(super) async fn remaining_lockout_seconds(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<i64> {
    let Some(last_failed_unix) = last_failed_attempt_unix(pool, email).await? else {
        return Ok(0);
    };
    Ok(remaining_seconds(
        last_failed_unix,
        now_unix_seconds(),
        config.lockout_window_seconds(),
    ))
}

async fn failed_attempts_in_window(
    pool: &PgPool,
    email: &str,
    window_seconds: i64,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS failed
        FROM login_attempts
        WHERE email = $1
          AND success = FALSE
          AND attempted_at > NOW() - ($2 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(window_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count login attempts")?;
    Ok(row.get("failed"))
}

async fn last_failed_attempt_unix(pool: &PgPool, email: &str) -> Result<Option<i64>> {
    let query = r"
        SELECT CAST(EXTRACT(EPOCH FROM MAX(attempted_at)) AS BIGINT) AS last_failed
        FROM login_attempts
        WHERE email = $1
          AND success = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to find last failed attempt")?;
    Ok(row.get("last_failed"))
}

fn remaining_seconds(last_failed_unix: i64, now_unix: i64, window_seconds: i64) -> i64 {
    (last_failed_unix + window_seconds - now_unix).max(0)
}

#[cfg(test)]
mod tests {
    use super::remaining_seconds;

    #[test]
    fn remaining_counts_down_from_last_failure() {
        // 15-minute window, failure 10 minutes ago: 5 minutes left.
        assert_eq!(remaining_seconds(1_000, 1_600, 900), 300);
    }

    #[test]
    fn remaining_floors_at_zero_after_window() {
        assert_eq!(remaining_seconds(1_000, 1_901, 900), 0);
        assert_eq!(remaining_seconds(1_000, 10_000, 900), 0);
    }

    #[test]
    fn remaining_full_window_immediately_after_failure() {
        assert_eq!(remaining_seconds(1_000, 1_000, 900), 900);
    }
}
