//! Identity provider HTTP client (code exchange + profile fetch).

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::error;

use super::oauth::OauthConfig;

/// Outbound calls must not hang a login forever.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure talking to the identity provider. Details are logged server-side
/// and never shown to the end user.
#[derive(Debug)]
pub(super) enum ProviderError {
    Network(String),
    Status(u16),
    MissingField(&'static str),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(detail) => write!(f, "provider request failed: {detail}"),
            Self::Status(status) => write!(f, "provider returned status {status}"),
            Self::MissingField(field) => write!(f, "provider response missing field: {field}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Normalized profile; optional fields default rather than fail.
#[derive(Debug, Clone)]
pub(super) struct ProviderProfile {
    pub(super) id: String,
    pub(super) email: String,
    pub(super) name: Option<String>,
    pub(super) picture: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TokenResponseRaw {
    access_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ProfileRaw {
    // OIDC providers use `sub`; some legacy endpoints use `id`.
    sub: Option<String>,
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

pub(super) struct ProviderClient {
    client: Client,
}

impl ProviderClient {
    pub(super) fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Exchange the authorization code for an access token.
    pub(super) async fn exchange_code(
        &self,
        config: &OauthConfig,
        code: &str,
    ) -> Result<String, ProviderError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_url()),
            ("client_id", config.client_id()),
            ("client_secret", config.client_secret().expose_secret()),
        ];

        let response = self
            .client
            .post(config.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                error!("Token exchange request failed: {err}");
                ProviderError::Network(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Token exchange returned status {status}");
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: TokenResponseRaw = response.json().await.map_err(|err| {
            error!("Token exchange response unparseable: {err}");
            ProviderError::Network(err.to_string())
        })?;

        parse_token_response(body)
    }

    /// Fetch the user's profile with the access token.
    pub(super) async fn fetch_profile(
        &self,
        config: &OauthConfig,
        access_token: &str,
    ) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .client
            .get(config.userinfo_url())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| {
                error!("Userinfo request failed: {err}");
                ProviderError::Network(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Userinfo returned status {status}");
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: ProfileRaw = response.json().await.map_err(|err| {
            error!("Userinfo response unparseable: {err}");
            ProviderError::Network(err.to_string())
        })?;

        parse_profile(body)
    }
}

fn parse_token_response(raw: TokenResponseRaw) -> Result<String, ProviderError> {
    raw.access_token
        .filter(|token| !token.is_empty())
        .ok_or(ProviderError::MissingField("access_token"))
}

fn parse_profile(raw: ProfileRaw) -> Result<ProviderProfile, ProviderError> {
    let id = raw
        .sub
        .or(raw.id)
        .filter(|id| !id.is_empty())
        .ok_or(ProviderError::MissingField("sub"))?;
    let email = raw
        .email
        .filter(|email| !email.is_empty())
        .ok_or(ProviderError::MissingField("email"))?;

    // Fall back to assembling a display name from the name parts.
    let name = raw.name.or_else(|| match (raw.given_name, raw.family_name) {
        (Some(given), Some(family)) => Some(format!("{given} {family}")),
        (Some(given), None) => Some(given),
        (None, Some(family)) => Some(family),
        (None, None) => None,
    });

    Ok(ProviderProfile {
        id,
        email,
        name,
        picture: raw.picture,
    })
}
