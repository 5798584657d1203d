//! Payment gateway HTTP client (initialize + verify-by-reference).

use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

use super::state::PaymentsConfig;

/// Outbound calls must not hang a checkout forever.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure talking to the payment gateway. Details are logged server-side
/// and surfaced to users as a generic "try again" message.
#[derive(Debug)]
pub(super) enum GatewayError {
    Network(String),
    Status(u16),
    Rejected(String),
    MissingField(&'static str),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(detail) => write!(f, "gateway request failed: {detail}"),
            Self::Status(status) => write!(f, "gateway returned status {status}"),
            Self::Rejected(message) => write!(f, "gateway rejected the request: {message}"),
            Self::MissingField(field) => write!(f, "gateway response missing field: {field}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// What the gateway reports for a reference on verify.
#[derive(Debug)]
pub(super) struct GatewayVerification {
    /// True only for an explicit success status; anything else fails the
    /// transaction.
    pub(super) success: bool,
    /// Full gateway response, persisted for audit.
    pub(super) raw: Value,
}

pub(super) struct GatewayClient {
    client: Client,
}

impl GatewayClient {
    pub(super) fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(GATEWAY_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Start a checkout: hand the pending reference to the gateway and get
    /// back the page to redirect the user to.
    pub(super) async fn initialize_transaction(
        &self,
        config: &PaymentsConfig,
        reference: &str,
        email: &str,
        amount_cents: i64,
        callback_url: &str,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/transaction/initialize", config.gateway_base_url());
        // Metadata rides along so the webhook can reconstruct the purchase
        // even if our pending row never made it.
        let body = json!({
            "reference": reference,
            "email": email,
            "amount": amount_cents,
            "currency": config.currency(),
            "callback_url": callback_url,
            "metadata": {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
            },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(config.secret_key().expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!("Gateway initialize request failed: {err}");
                GatewayError::Network(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Gateway initialize returned status {status}");
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|err| {
            error!("Gateway initialize response unparseable: {err}");
            GatewayError::Network(err.to_string())
        })?;

        parse_initialize_response(&body)
    }

    /// Ask the gateway what actually happened to a reference.
    pub(super) async fn verify_transaction(
        &self,
        config: &PaymentsConfig,
        reference: &str,
    ) -> Result<GatewayVerification, GatewayError> {
        let url = format!(
            "{}/transaction/verify/{reference}",
            config.gateway_base_url()
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(config.secret_key().expose_secret())
            .send()
            .await
            .map_err(|err| {
                error!("Gateway verify request failed: {err}");
                GatewayError::Network(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Gateway verify returned status {status}");
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|err| {
            error!("Gateway verify response unparseable: {err}");
            GatewayError::Network(err.to_string())
        })?;

        Ok(parse_verify_response(body))
    }
}

/// Envelope: `{"status": bool, "message": ..., "data": {...}}`.
fn parse_initialize_response(body: &Value) -> Result<String, GatewayError> {
    let accepted = body
        .get("status")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !accepted {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message")
            .to_string();
        return Err(GatewayError::Rejected(message));
    }

    body.get("data")
        .and_then(|data| data.get("authorization_url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or(GatewayError::MissingField("authorization_url"))
}

/// A verify response is authoritative: only `data.status == "success"`
/// completes the transaction; every other answer fails it.
fn parse_verify_response(body: Value) -> GatewayVerification {
    let success = body
        .get("status")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        && body
            .get("data")
            .and_then(|data| data.get("status"))
            .and_then(Value::as_str)
            == Some("success");
    GatewayVerification { success, raw: body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_response_extracts_redirect() {
        let body = json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.gateway.test/abc",
                "reference": "krs_ref"
            }
        });
        let parsed = parse_initialize_response(&body);
        assert!(matches!(
            parsed,
            Ok(url) if url == "https://checkout.gateway.test/abc"
        ));
    }

    #[test]
    fn initialize_response_rejected_carries_message() {
        let body = json!({"status": false, "message": "Invalid key"});
        let parsed = parse_initialize_response(&body);
        assert!(matches!(
            parsed,
            Err(GatewayError::Rejected(message)) if message == "Invalid key"
        ));
    }

    #[test]
    fn initialize_response_missing_url() {
        let body = json!({"status": true, "data": {}});
        let parsed = parse_initialize_response(&body);
        assert!(matches!(
            parsed,
            Err(GatewayError::MissingField("authorization_url"))
        ));
    }

    #[test]
    fn verify_response_success_requires_both_flags() {
        let success = parse_verify_response(json!({
            "status": true,
            "data": {"status": "success", "amount": 4999}
        }));
        assert!(success.success);

        let failed = parse_verify_response(json!({
            "status": true,
            "data": {"status": "failed"}
        }));
        assert!(!failed.success);

        let envelope_false = parse_verify_response(json!({
            "status": false,
            "data": {"status": "success"}
        }));
        assert!(!envelope_false.success);

        let empty = parse_verify_response(json!({}));
        assert!(!empty.success);
    }

    #[test]
    fn verify_response_keeps_raw_body() {
        let body = json!({"status": true, "data": {"status": "success", "channel": "card"}});
        let verification = parse_verify_response(body.clone());
        assert_eq!(verification.raw, body);
    }

    #[test]
    fn gateway_error_display() {
        assert_eq!(
            GatewayError::Status(500).to_string(),
            "gateway returned status 500"
        );
        assert_eq!(
            GatewayError::MissingField("authorization_url").to_string(),
            "gateway response missing field: authorization_url"
        );
    }
}
