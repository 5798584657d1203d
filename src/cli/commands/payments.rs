use anyhow::{Result, anyhow};
use clap::{Arg, Command};

/// Payment gateway settings. `None` when payments are not configured.
#[derive(Debug)]
pub struct Settings {
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub currency: String,
}

/// Extract payment gateway settings from validated matches.
///
/// # Errors
/// Returns an error when only one of the gateway arguments is set.
pub fn parse(matches: &clap::ArgMatches) -> Result<Option<Settings>> {
    let base_url = matches.get_one::<String>("gateway-base-url");
    let secret_key = matches.get_one::<String>("gateway-secret-key");

    match (base_url, secret_key) {
        (None, None) => Ok(None),
        (Some(base_url), Some(secret_key)) => Ok(Some(Settings {
            gateway_base_url: base_url.clone(),
            gateway_secret_key: secret_key.clone(),
            currency: matches
                .get_one::<String>("gateway-currency")
                .cloned()
                .unwrap_or_else(|| "USD".to_string()),
        })),
        _ => Err(anyhow!(
            "payments are partially configured; set both --gateway-base-url and --gateway-secret-key or neither"
        )),
    }
}

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("gateway-base-url")
                .long("gateway-base-url")
                .help("Payment gateway API base URL")
                .env("KURSO_GATEWAY_BASE_URL"),
        )
        .arg(
            Arg::new("gateway-secret-key")
                .long("gateway-secret-key")
                .help("Payment gateway secret key (API auth and webhook HMAC)")
                .env("KURSO_GATEWAY_SECRET_KEY"),
        )
        .arg(
            Arg::new("gateway-currency")
                .long("gateway-currency")
                .help("Default ISO currency code for new transactions")
                .env("KURSO_GATEWAY_CURRENCY")
                .default_value("USD"),
        )
}
