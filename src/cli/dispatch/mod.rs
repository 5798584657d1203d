//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, oauth, payments};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let oauth_opts = oauth::parse(matches)?;
    let payments_opts = payments::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        remember_session_ttl_seconds: auth_opts.remember_session_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        verification_token_ttl_seconds: auth_opts.verification_token_ttl_seconds,
        email_resend_cooldown_seconds: auth_opts.resend_cooldown_seconds,
        lockout_window_seconds: auth_opts.lockout_window_seconds,
        lockout_threshold: auth_opts.lockout_threshold,
        email_outbox_poll_seconds: auth_opts.email_outbox.poll_seconds,
        email_outbox_batch_size: auth_opts.email_outbox.batch_size,
        email_outbox_max_attempts: auth_opts.email_outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.email_outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.email_outbox.backoff_max_seconds,
        oauth: oauth_opts,
        payments: payments_opts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_with_defaults() {
        temp_env::with_vars(
            [
                ("KURSO_DSN", Some("postgres://user@localhost:5432/kurso")),
                ("KURSO_OAUTH_CLIENT_ID", None::<&str>),
                ("KURSO_GATEWAY_BASE_URL", None),
                ("KURSO_GATEWAY_SECRET_KEY", None),
            ],
            || {
                let command = commands::new();
                let matches = command.get_matches_from(vec!["kurso"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, "postgres://user@localhost:5432/kurso");
                    assert_eq!(args.session_ttl_seconds, 43200);
                    assert_eq!(args.remember_session_ttl_seconds, 2_592_000);
                    assert_eq!(args.reset_token_ttl_seconds, 7200);
                    assert_eq!(args.lockout_window_seconds, 900);
                    assert_eq!(args.lockout_threshold, 10);
                    assert!(args.oauth.is_none());
                    assert!(args.payments.is_none());
                }
            },
        );
    }

    #[test]
    fn server_action_with_oauth_and_payments() {
        let command = commands::new();
        let matches = command.get_matches_from(vec![
            "kurso",
            "--dsn",
            "postgres://user@localhost:5432/kurso",
            "--oauth-client-id",
            "client",
            "--oauth-client-secret",
            "secret",
            "--oauth-authorize-url",
            "https://provider.test/authorize",
            "--oauth-token-url",
            "https://provider.test/token",
            "--oauth-userinfo-url",
            "https://provider.test/userinfo",
            "--oauth-redirect-url",
            "https://app.kurso.dev/oauth/callback",
            "--gateway-base-url",
            "https://api.gateway.test",
            "--gateway-secret-key",
            "sk_test_secret",
        ]);
        let action = handler(&matches);
        assert!(action.is_ok());
        if let Ok(Action::Server(args)) = action {
            assert!(args.oauth.is_some());
            assert!(args.payments.is_some());
        }
    }

    #[test]
    fn partial_oauth_configuration_fails() {
        temp_env::with_vars(
            [
                ("KURSO_OAUTH_CLIENT_SECRET", None::<&str>),
                ("KURSO_OAUTH_AUTHORIZE_URL", None),
                ("KURSO_OAUTH_TOKEN_URL", None),
                ("KURSO_OAUTH_USERINFO_URL", None),
                ("KURSO_OAUTH_REDIRECT_URL", None),
            ],
            || {
                let command = commands::new();
                let matches = command.get_matches_from(vec![
                    "kurso",
                    "--dsn",
                    "postgres://user@localhost:5432/kurso",
                    "--oauth-client-id",
                    "client",
                ]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("partially configured"));
                }
            },
        );
    }
}
