use anyhow::{Result, anyhow};
use clap::{Arg, Command};

/// OAuth provider settings. `None` when OAuth sign-in is not configured.
#[derive(Debug)]
pub struct Settings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_url: String,
    pub scope: String,
}

/// Extract OAuth settings from validated matches.
///
/// All provider arguments must be present together; a partial configuration
/// is an error rather than a silently disabled feature.
///
/// # Errors
/// Returns an error when only some of the provider arguments are set.
pub fn parse(matches: &clap::ArgMatches) -> Result<Option<Settings>> {
    let values = [
        matches.get_one::<String>("oauth-client-id"),
        matches.get_one::<String>("oauth-client-secret"),
        matches.get_one::<String>("oauth-authorize-url"),
        matches.get_one::<String>("oauth-token-url"),
        matches.get_one::<String>("oauth-userinfo-url"),
        matches.get_one::<String>("oauth-redirect-url"),
    ];

    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    if values.iter().any(Option::is_none) {
        return Err(anyhow!(
            "OAuth is partially configured; set all --oauth-* arguments or none"
        ));
    }

    let [client_id, client_secret, authorize_url, token_url, userinfo_url, redirect_url] =
        values.map(|value| value.cloned().unwrap_or_default());

    Ok(Some(Settings {
        client_id,
        client_secret,
        authorize_url,
        token_url,
        userinfo_url,
        redirect_url,
        scope: matches
            .get_one::<String>("oauth-scope")
            .cloned()
            .unwrap_or_else(|| "openid email profile".to_string()),
    }))
}

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("oauth-client-id")
                .long("oauth-client-id")
                .help("OAuth client id issued by the identity provider")
                .env("KURSO_OAUTH_CLIENT_ID"),
        )
        .arg(
            Arg::new("oauth-client-secret")
                .long("oauth-client-secret")
                .help("OAuth client secret issued by the identity provider")
                .env("KURSO_OAUTH_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("oauth-authorize-url")
                .long("oauth-authorize-url")
                .help("Identity provider authorization endpoint")
                .env("KURSO_OAUTH_AUTHORIZE_URL"),
        )
        .arg(
            Arg::new("oauth-token-url")
                .long("oauth-token-url")
                .help("Identity provider token endpoint")
                .env("KURSO_OAUTH_TOKEN_URL"),
        )
        .arg(
            Arg::new("oauth-userinfo-url")
                .long("oauth-userinfo-url")
                .help("Identity provider userinfo endpoint")
                .env("KURSO_OAUTH_USERINFO_URL"),
        )
        .arg(
            Arg::new("oauth-redirect-url")
                .long("oauth-redirect-url")
                .help("Callback URL registered with the identity provider")
                .env("KURSO_OAUTH_REDIRECT_URL"),
        )
        .arg(
            Arg::new("oauth-scope")
                .long("oauth-scope")
                .help("Scopes requested from the identity provider")
                .env("KURSO_OAUTH_SCOPE")
                .default_value("openid email profile"),
        )
}
