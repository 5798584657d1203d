//! Database helpers for accounts, sessions, and auth tokens.
//!
//! Expected tables: `users` (id uuid, email unique, password_hash nullable,
//! oauth_provider_id nullable unique, role, status, email_verified_at,
//! last_login_at), `user_sessions` (session_hash unique, user_id, ip,
//! user_agent, expires_at), `email_verification_tokens` and
//! `password_reset_tokens` (token_hash unique, user_id, expires_at,
//! consumed_at), and `oauth_login_states` (state_hash unique, expires_at).
//! All tokens are stored hashed; raw values only ever reach the client.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::email::{EmailMessage, enqueue_email};
use crate::api::handlers::is_unique_violation;

use super::state::AuthConfig;
use super::utils::{
    build_reset_url, build_verify_url, generate_token, hash_reset_token, hash_session_token,
    hash_verification_token,
};

/// Outcome when attempting to create a new user + verification record.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created,
    Conflict,
}

/// Outcome for a resend request (always success-shaped to avoid probing).
#[derive(Debug)]
pub(super) enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

/// Account fields needed by login and OAuth resolution.
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) password_hash: Option<String>,
    pub(super) role: String,
    pub(super) status: String,
}

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: String,
}

/// Look up an account by normalized email.
pub(super) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, password_hash, role, status
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        status: row.get("status"),
    }))
}

pub(super) async fn insert_user_and_verification(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    // Transaction ensures user creation, verification token, and email outbox
    // row stay consistent even if something fails.
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users (email, password_hash, role, status)
        VALUES ($1, $2, 'student', 'pending')
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let _token = insert_verification_records(&mut tx, user_id, email, config).await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created)
}

pub(super) async fn insert_verification_records(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
    config: &AuthConfig,
) -> Result<String> {
    // Generate a raw token for the email link and store only its hash.
    let token = generate_token()?;
    let token_hash = hash_verification_token(&token);

    let query = r"
        INSERT INTO email_verification_tokens
            (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(config.verification_token_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email verification token")?;

    let verify_url = build_verify_url(config.frontend_base_url(), &token);
    enqueue_email(
        tx,
        &EmailMessage {
            to_email: email.to_string(),
            subject: "Verify your email address".to_string(),
            html_body: format!(
                "<p>Welcome to Kurso. Confirm your email address by opening \
                 <a href=\"{verify_url}\">this link</a>. The link expires in a few hours.</p>"
            ),
        },
    )
    .await?;

    Ok(token)
}

pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, ip, user_agent, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ip)
            .bind(user_agent)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Only accept active users and unexpired sessions.
    let query = r"
        SELECT users.id, users.email, users.role
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
          AND users.status = 'active'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: row.get("role"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Opportunistic sweep of expired session rows, run on successful login.
pub(super) async fn delete_expired_sessions(pool: &PgPool) -> Result<()> {
    let query = "DELETE FROM user_sessions WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep expired sessions")?;
    Ok(())
}

pub(super) async fn update_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update last login")?;
    Ok(())
}

pub(super) async fn consume_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<bool> {
    // Mark the token consumed if still valid; then activate the user in the same transaction.
    let query = r"
        UPDATE email_verification_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    let Some(row) = row else {
        return Ok(false);
    };

    let user_id: Uuid = row.get("user_id");
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(),
            status = 'active',
            updated_at = NOW()
        WHERE id = $1
          AND status = 'pending'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update user status")?;

    Ok(true)
}

pub(super) async fn enqueue_resend_verification(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<ResendOutcome> {
    // Resend is intentionally opaque: callers always get a success-shaped
    // response to avoid account probing.
    let mut tx = pool.begin().await.context("begin resend transaction")?;

    let query = r"
        SELECT id, email, status
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup user for resend")?;

    let Some(row) = row else {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    };

    let status: String = row.get("status");
    if status != "pending" {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    }

    let user_id: Uuid = row.get("id");
    if resend_cooldown_active(&mut tx, user_id, config.resend_cooldown_seconds()).await? {
        tx.commit().await.context("commit resend cooldown")?;
        return Ok(ResendOutcome::Cooldown);
    }

    let email: String = row.get("email");
    let _ = insert_verification_records(&mut tx, user_id, &email, config).await?;
    tx.commit().await.context("commit resend enqueue")?;
    Ok(ResendOutcome::Queued)
}

async fn resend_cooldown_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    cooldown_seconds: i64,
) -> Result<bool> {
    // Cooldown prevents repeated resend requests from spamming the outbox.
    let query = r"
        SELECT 1
        FROM email_verification_tokens
        WHERE user_id = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
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
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check resend cooldown")?;
    Ok(row.is_some())
}

/// Internals of a forgot-password request.
///
/// Invalidates every unused reset token for the account, stores a fresh
/// hashed token, and enqueues the reset mail, all in one transaction. A
/// missing account is a silent no-op so the endpoint stays opaque.
pub(super) async fn enqueue_password_reset(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin reset transaction")?;

    let query = r"
        SELECT id, email
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup user for reset")?;

    let Some(row) = row else {
        tx.commit().await.context("commit reset noop")?;
        return Ok(());
    };

    let user_id: Uuid = row.get("id");

    // At most one active token per account: prior unused tokens are consumed,
    // not deleted, so the audit trail survives.
    let query = r"
        UPDATE password_reset_tokens
        SET consumed_at = NOW()
        WHERE user_id = $1
          AND consumed_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to invalidate prior reset tokens")?;

    let token = generate_token()?;
    let token_hash = hash_reset_token(&token);

    let query = r"
        INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(config.reset_token_ttl_seconds())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert reset token")?;

    let reset_url = build_reset_url(config.frontend_base_url(), &token);
    let to_email: String = row.get("email");
    enqueue_email(
        &mut tx,
        &EmailMessage {
            to_email,
            subject: "Reset your password".to_string(),
            html_body: format!(
                "<p>A password reset was requested for your account. Open \
                 <a href=\"{reset_url}\">this link</a> to choose a new password. \
                 If you did not request this, you can ignore this email.</p>"
            ),
        },
    )
    .await?;

    tx.commit().await.context("commit reset enqueue")?;
    Ok(())
}

/// Consume a reset token and set the new password atomically.
///
/// The guarded UPDATE is what makes a raced reuse lose: only one caller can
/// flip `consumed_at` from NULL.
pub(super) async fn consume_reset_and_set_password(
    pool: &PgPool,
    token_hash: &[u8],
    password_hash: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin consume-reset transaction")?;

    let query = r"
        UPDATE password_reset_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume reset token")?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Ok(false);
    };

    let user_id: Uuid = row.get("user_id");
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password")?;

    tx.commit().await.context("commit consume-reset transaction")?;
    Ok(true)
}

/// Store a hashed OAuth state value for the duration of the handshake.
pub(super) async fn insert_oauth_state(
    pool: &PgPool,
    state_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO oauth_login_states (state_hash, expires_at)
        VALUES ($1, NOW() + ($2 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(state_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert oauth state")?;
    Ok(())
}

/// Delete the state row regardless of expiry; return whether it was live.
///
/// Single-use by construction: the first consumer deletes the row, so a
/// replayed callback fails the CSRF check even with a matching cookie.
pub(super) async fn consume_oauth_state(pool: &PgPool, state_hash: &[u8]) -> Result<bool> {
    let query = r"
        DELETE FROM oauth_login_states
        WHERE state_hash = $1
        RETURNING (expires_at > NOW()) AS live
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(state_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume oauth state")?;

    Ok(row.is_some_and(|row| row.get::<bool, _>("live")))
}

/// Map an external identity onto a local account.
///
/// Precedence is load-bearing: provider id first, then email (linking the
/// provider id to the existing account), then a fresh pre-verified account.
/// Matching by email before provider id would let a provider-side email
/// collision take over an unrelated local account.
pub(super) async fn resolve_oauth_account(
    pool: &PgPool,
    provider_user_id: &str,
    email: &str,
) -> Result<UserRecord> {
    let query = r"
        SELECT id, email, password_hash, role, status
        FROM users
        WHERE oauth_provider_id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(provider_user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by provider id")?;

    if let Some(row) = row {
        return Ok(UserRecord {
            id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
            status: row.get("status"),
        });
    }

    if let Some(user) = lookup_user_by_email(pool, email).await? {
        let query = r"
            UPDATE users
            SET oauth_provider_id = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user.id)
            .bind(provider_user_id)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to link provider id")?;
        return Ok(user);
    }

    // The provider verified the email, so the account starts active.
    let query = r"
        INSERT INTO users (email, oauth_provider_id, role, status, email_verified_at)
        VALUES ($1, $2, 'student', 'active', NOW())
        RETURNING id, email, password_hash, role, status
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(email)
        .bind(provider_user_id)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match inserted {
        Ok(row) => Ok(UserRecord {
            id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
            status: row.get("status"),
        }),
        Err(err) if is_unique_violation(&err) => {
            // Lost a race with a concurrent callback for the same identity.
            lookup_user_by_email(pool, email)
                .await?
                .ok_or_else(|| anyhow!("account vanished after unique violation"))
        }
        Err(err) => Err(err).context("failed to insert oauth user"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ResendOutcome, SignupOutcome, UserRecord};
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Created), "Created");
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn resend_outcome_debug_names() {
        assert_eq!(format!("{:?}", ResendOutcome::Queued), "Queued");
        assert_eq!(format!("{:?}", ResendOutcome::Cooldown), "Cooldown");
        assert_eq!(format!("{:?}", ResendOutcome::Noop), "Noop");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: Uuid::nil(),
            email: "alice@example.com".to_string(),
            password_hash: None,
            role: "student".to_string(),
            status: "pending".to_string(),
        };
        assert_eq!(record.id, Uuid::nil());
        assert!(record.password_hash.is_none());
        assert_eq!(record.role, "student");
        assert_eq!(record.status, "pending");
    }
}
