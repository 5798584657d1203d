use crate::{
    api,
    cli::commands::{oauth, payments},
};
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub remember_session_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub verification_token_ttl_seconds: i64,
    pub email_resend_cooldown_seconds: i64,
    pub lockout_window_seconds: i64,
    pub lockout_threshold: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
    pub oauth: Option<oauth::Settings>,
    pub payments: Option<payments::Settings>,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = api::handlers::auth::AuthConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_remember_session_ttl_seconds(args.remember_session_ttl_seconds)
        .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds)
        .with_verification_token_ttl_seconds(args.verification_token_ttl_seconds)
        .with_resend_cooldown_seconds(args.email_resend_cooldown_seconds)
        .with_lockout_window_seconds(args.lockout_window_seconds)
        .with_lockout_threshold(args.lockout_threshold);

    let oauth_config = args.oauth.map(|settings| {
        api::handlers::auth::OauthConfig::new(
            settings.client_id,
            SecretString::from(settings.client_secret),
            settings.authorize_url,
            settings.token_url,
            settings.userinfo_url,
            settings.redirect_url,
        )
        .with_scope(settings.scope)
    });

    let payments_config = args.payments.map(|settings| {
        api::handlers::payments::PaymentsConfig::new(
            settings.gateway_base_url,
            SecretString::from(settings.gateway_secret_key),
        )
        .with_currency(settings.currency)
    });

    let email_config = api::email::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(
        args.port,
        args.dsn,
        auth_config,
        oauth_config,
        payments_config,
        email_config,
    )
    .await
}
