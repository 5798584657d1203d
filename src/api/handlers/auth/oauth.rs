//! OAuth sign-in flow.
//!
//! The handshake walks one way through: authorization URL issued (state
//! stored server-side, mirrored in a short-lived cookie) → callback with
//! `code` + `state` → state consumed and compared → code exchanged → profile
//! fetched → account resolved → session created.
//!
//! The CSRF check is the security core of the flow: it runs before any
//! network call, and the stored state is deleted on first use whether or not
//! it matches, so neither a forged nor a replayed callback can proceed.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{InvalidHeaderValue, LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

use crate::api::handlers::ApiMessage;

use super::login::{LoginDenied, denied_response, not_active_reason};
use super::provider::ProviderClient;
use super::session::session_cookie;
use super::state::AuthState;
use super::storage::{consume_oauth_state, insert_oauth_state, insert_session};
use super::types::OauthCallbackQuery;
use super::utils::{generate_token, hash_oauth_state, normalize_email};

const OAUTH_STATE_COOKIE: &str = "kurso_oauth_state";
const OAUTH_STATE_TTL_SECONDS: i64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct OauthConfig {
    client_id: String,
    client_secret: SecretString,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
    redirect_url: String,
    scope: String,
}

impl OauthConfig {
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        authorize_url: String,
        token_url: String,
        userinfo_url: String,
        redirect_url: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            authorize_url,
            token_url,
            userinfo_url,
            redirect_url,
            scope: "openid email profile".to_string(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: String) -> Self {
        self.scope = scope;
        self
    }

    pub(super) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(super) fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    pub(super) fn token_url(&self) -> &str {
        &self.token_url
    }

    pub(super) fn userinfo_url(&self) -> &str {
        &self.userinfo_url
    }

    pub(super) fn redirect_url(&self) -> &str {
        &self.redirect_url
    }
}

/// OAuth runtime state; holds nothing when the feature is unconfigured.
pub struct OauthState {
    inner: Option<(OauthConfig, ProviderClient)>,
}

impl OauthState {
    /// Build provider state from optional config.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: Option<OauthConfig>) -> anyhow::Result<Self> {
        let inner = match config {
            Some(config) => Some((config, ProviderClient::new()?)),
            None => None,
        };
        Ok(Self { inner })
    }

    fn parts(&self) -> Option<&(OauthConfig, ProviderClient)> {
        self.inner.as_ref()
    }
}

/// Compose the provider authorization redirect with our state value.
fn build_authorize_url(config: &OauthConfig, state: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&config.authorize_url)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_url)
        .append_pair("scope", &config.scope)
        .append_pair("state", state);
    Ok(url.into())
}

fn oauth_state_cookie(secure: bool, state: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{OAUTH_STATE_COOKIE}={state}; Path=/; HttpOnly; SameSite=Lax; Max-Age={OAUTH_STATE_TTL_SECONDS}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_oauth_state_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{OAUTH_STATE_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_state_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == OAUTH_STATE_COOKIE {
            return Some(val.to_string());
        }
    }
    None
}

fn unconfigured() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiMessage::err("OAuth sign-in is not configured")),
    )
        .into_response()
}

fn csrf_mismatch(secure: bool) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_oauth_state_cookie(secure) {
        headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::FORBIDDEN,
        headers,
        Json(ApiMessage::err("Invalid OAuth state")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/oauth/authorize",
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 503, description = "OAuth not configured", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn authorize(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    oauth_state: Extension<Arc<OauthState>>,
) -> impl IntoResponse {
    let Some((config, _provider)) = oauth_state.parts() else {
        return unconfigured();
    };

    let state = match generate_token() {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to generate OAuth state: {err}");
            return internal_error();
        }
    };

    // Stored hashed server-side, raw in the browser cookie. Both halves are
    // needed on callback.
    let state_hash = hash_oauth_state(&state);
    if let Err(err) = insert_oauth_state(&pool, &state_hash, OAUTH_STATE_TTL_SECONDS).await {
        error!("Failed to store OAuth state: {err}");
        return internal_error();
    }

    let redirect = match build_authorize_url(config, &state) {
        Ok(redirect) => redirect,
        Err(err) => {
            error!("Failed to build authorize URL: {err}");
            return internal_error();
        }
    };

    let secure = auth_state.config().session_cookie_secure();
    let mut headers = HeaderMap::new();
    match (
        HeaderValue::from_str(&redirect),
        oauth_state_cookie(secure, &state),
    ) {
        (Ok(location), Ok(cookie)) => {
            headers.insert(LOCATION, location);
            headers.insert(SET_COOKIE, cookie);
            (StatusCode::FOUND, headers).into_response()
        }
        _ => internal_error(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/oauth/callback",
    params(
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "CSRF state value")
    ),
    responses(
        (status = 302, description = "Signed in; session cookie set"),
        (status = 400, description = "Provider denied or malformed callback", body = ApiMessage),
        (status = 403, description = "CSRF state mismatch", body = ApiMessage),
        (status = 502, description = "Identity provider failure", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn callback(
    headers: HeaderMap,
    query: Query<OauthCallbackQuery>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    oauth_state: Extension<Arc<OauthState>>,
) -> impl IntoResponse {
    let Some((config, provider)) = oauth_state.parts() else {
        return unconfigured();
    };
    let secure = auth_state.config().session_cookie_secure();

    // The CSRF gate comes first: consume the stored state (single-use, even
    // on mismatch) and require the provider echo to equal the cookie value.
    let Some(cookie_state) = extract_state_cookie(&headers) else {
        return csrf_mismatch(secure);
    };
    let state_live = match consume_oauth_state(&pool, &hash_oauth_state(&cookie_state)).await {
        Ok(live) => live,
        Err(err) => {
            error!("Failed to consume OAuth state: {err}");
            return internal_error();
        }
    };
    let echoed_state = query.state.as_deref().unwrap_or_default();
    if !state_live || echoed_state.is_empty() || echoed_state != cookie_state {
        return csrf_mismatch(secure);
    }

    if let Some(provider_error) = query.error.as_deref() {
        debug!("Provider returned error on callback: {provider_error}");
        return provider_denied(secure);
    }
    let Some(code) = query.code.as_deref().filter(|code| !code.is_empty()) else {
        return provider_denied(secure);
    };

    // Network calls only happen after the state check has passed.
    let access_token = match provider.exchange_code(config, code).await {
        Ok(token) => token,
        Err(err) => {
            error!("Code exchange failed: {err}");
            return provider_failure(secure);
        }
    };
    let profile = match provider.fetch_profile(config, &access_token).await {
        Ok(profile) => profile,
        Err(err) => {
            error!("Profile fetch failed: {err}");
            return provider_failure(secure);
        }
    };

    debug!(
        provider_user = %profile.id,
        name = profile.name.as_deref().unwrap_or(""),
        "OAuth profile fetched"
    );

    let email = normalize_email(&profile.email);
    let user = match super::storage::resolve_oauth_account(&pool, &profile.id, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Account resolution failed: {err}");
            return internal_error();
        }
    };

    // Same gate as password login: a resolvable account may still be barred.
    if user.status != "active" {
        return denied_response(&LoginDenied::AccountNotActive {
            reason: not_active_reason(&user.status),
        });
    }

    let ttl_seconds = auth_state.config().session_ttl_seconds(false);
    let token = match insert_session(&pool, user.id, None, None, ttl_seconds).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return internal_error();
        }
    };

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_oauth_state_cookie(secure) {
        response_headers.append(SET_COOKIE, cookie);
    }
    match (
        session_cookie(&auth_state, &token, false),
        HeaderValue::from_str(auth_state.config().frontend_base_url()),
    ) {
        (Ok(cookie), Ok(location)) => {
            response_headers.append(SET_COOKIE, cookie);
            response_headers.insert(LOCATION, location);
            (StatusCode::FOUND, response_headers).into_response()
        }
        _ => internal_error(),
    }
}

fn provider_denied(secure: bool) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_oauth_state_cookie(secure) {
        headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::BAD_REQUEST,
        headers,
        Json(ApiMessage::err("OAuth sign-in was cancelled or failed")),
    )
        .into_response()
}

fn provider_failure(secure: bool) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_oauth_state_cookie(secure) {
        headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::BAD_GATEWAY,
        headers,
        Json(ApiMessage::err("Sign-in failed. Please try again.")),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::err("Sign-in failed. Please try again.")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn config() -> OauthConfig {
        OauthConfig::new(
            "client-id".to_string(),
            SecretString::from("client-secret".to_string()),
            "https://provider.test/authorize".to_string(),
            "https://provider.test/token".to_string(),
            "https://provider.test/userinfo".to_string(),
            "https://app.kurso.dev/oauth/callback".to_string(),
        )
    }

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(super::super::state::AuthConfig::new(
            "https://kurso.dev".to_string(),
        )))
    }

    #[test]
    fn authorize_url_carries_state_and_client() {
        let url = build_authorize_url(&config(), "the-state");
        assert!(url.is_ok());
        if let Ok(url) = url {
            assert!(url.starts_with("https://provider.test/authorize?"));
            assert!(url.contains("response_type=code"));
            assert!(url.contains("client_id=client-id"));
            assert!(url.contains("state=the-state"));
            assert!(url.contains("scope=openid+email+profile"));
        }
    }

    #[test]
    fn state_cookie_round_trip() {
        let cookie = oauth_state_cookie(true, "abc");
        assert!(cookie.is_ok());
        if let Ok(cookie) = cookie {
            let mut headers = HeaderMap::new();
            // Simulate the browser echoing the cookie back.
            let value = cookie.to_str().unwrap_or_default();
            let pair = value.split(';').next().unwrap_or_default();
            headers.insert(
                axum::http::header::COOKIE,
                HeaderValue::from_str(pair).expect("cookie pair"),
            );
            assert_eq!(extract_state_cookie(&headers), Some("abc".to_string()));
        }
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_oauth_state_cookie(false);
        assert!(cookie.is_ok());
        if let Ok(cookie) = cookie {
            let value = cookie.to_str().unwrap_or_default();
            assert!(value.contains("Max-Age=0"));
            assert!(!value.contains("Secure"));
        }
    }

    #[tokio::test]
    async fn callback_without_state_cookie_is_csrf_mismatch() -> anyhow::Result<()> {
        // No cookie, no DB row: the request dies at the CSRF gate without
        // touching the provider.
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let oauth = Arc::new(OauthState::new(Some(config()))?);
        let response = callback(
            HeaderMap::new(),
            Query(OauthCallbackQuery {
                code: Some("code".to_string()),
                state: Some("state".to_string()),
                error: None,
            }),
            Extension(pool),
            Extension(auth_state()),
            Extension(oauth),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn callback_unconfigured_is_unavailable() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let oauth = Arc::new(OauthState::new(None)?);
        let response = callback(
            HeaderMap::new(),
            Query(OauthCallbackQuery {
                code: None,
                state: None,
                error: None,
            }),
            Extension(pool),
            Extension(auth_state()),
            Extension(oauth),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn authorize_unconfigured_is_unavailable() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let oauth = Arc::new(OauthState::new(None)?);
        let response = authorize(Extension(pool), Extension(auth_state()), Extension(oauth))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }
}
