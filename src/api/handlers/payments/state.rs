//! Payment configuration and shared state.

use secrecy::SecretString;

use super::gateway::GatewayClient;

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    gateway_base_url: String,
    secret_key: SecretString,
    currency: String,
}

impl PaymentsConfig {
    #[must_use]
    pub fn new(gateway_base_url: String, secret_key: SecretString) -> Self {
        Self {
            gateway_base_url,
            secret_key,
            currency: "USD".to_string(),
        }
    }

    #[must_use]
    pub fn with_currency(mut self, currency: String) -> Self {
        self.currency = currency;
        self
    }

    pub(super) fn gateway_base_url(&self) -> &str {
        self.gateway_base_url.trim_end_matches('/')
    }

    /// Authenticates API calls and keys the webhook HMAC.
    pub(super) fn secret_key(&self) -> &SecretString {
        &self.secret_key
    }

    pub(super) fn currency(&self) -> &str {
        &self.currency
    }
}

/// Payments runtime state; holds nothing when the gateway is unconfigured.
pub struct PaymentsState {
    inner: Option<(PaymentsConfig, GatewayClient)>,
}

impl PaymentsState {
    /// Build gateway state from optional config.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: Option<PaymentsConfig>) -> anyhow::Result<Self> {
        let inner = match config {
            Some(config) => Some((config, GatewayClient::new()?)),
            None => None,
        };
        Ok(Self { inner })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub(super) fn parts(&self) -> Option<&(PaymentsConfig, GatewayClient)> {
        self.inner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PaymentsConfig {
        PaymentsConfig::new(
            "https://api.gateway.test/".to_string(),
            SecretString::from("sk_test_secret".to_string()),
        )
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        assert_eq!(config().gateway_base_url(), "https://api.gateway.test");
    }

    #[test]
    fn currency_default_and_override() {
        assert_eq!(config().currency(), "USD");
        assert_eq!(config().with_currency("NGN".to_string()).currency(), "NGN");
    }

    #[test]
    fn state_enabled_tracks_config() -> anyhow::Result<()> {
        assert!(!PaymentsState::new(None)?.enabled());
        assert!(PaymentsState::new(Some(config()))?.enabled());
        Ok(())
    }
}
