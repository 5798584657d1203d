//! Auth configuration and shared state.

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_LOCKOUT_THRESHOLD: i64 = 10;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    remember_session_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    lockout_window_seconds: i64,
    lockout_threshold: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_session_ttl_seconds: DEFAULT_REMEMBER_SESSION_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            lockout_window_seconds: DEFAULT_LOCKOUT_WINDOW_SECONDS,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_window_seconds(mut self, seconds: i64) -> Self {
        self.lockout_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i64) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// TTL for the session row and cookie; `remember` selects the long TTL.
    pub(super) fn session_ttl_seconds(&self, remember: bool) -> i64 {
        if remember {
            self.remember_session_ttl_seconds
        } else {
            self.session_ttl_seconds
        }
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(super) fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn lockout_window_seconds(&self) -> i64 {
        self.lockout_window_seconds
    }

    pub(super) fn lockout_threshold(&self) -> i64 {
        self.lockout_threshold
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthConfig, AuthState};

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://kurso.dev".to_string());

        assert_eq!(config.frontend_base_url(), "https://kurso.dev");
        assert_eq!(
            config.session_ttl_seconds(false),
            super::DEFAULT_SESSION_TTL_SECONDS
        );
        assert_eq!(
            config.session_ttl_seconds(true),
            super::DEFAULT_REMEMBER_SESSION_TTL_SECONDS
        );
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.lockout_threshold(), super::DEFAULT_LOCKOUT_THRESHOLD);

        let config = config
            .with_session_ttl_seconds(600)
            .with_remember_session_ttl_seconds(1200)
            .with_reset_token_ttl_seconds(120)
            .with_verification_token_ttl_seconds(240)
            .with_resend_cooldown_seconds(30)
            .with_lockout_window_seconds(60)
            .with_lockout_threshold(3);

        assert_eq!(config.session_ttl_seconds(false), 600);
        assert_eq!(config.session_ttl_seconds(true), 1200);
        assert_eq!(config.reset_token_ttl_seconds(), 120);
        assert_eq!(config.verification_token_ttl_seconds(), 240);
        assert_eq!(config.resend_cooldown_seconds(), 30);
        assert_eq!(config.lockout_window_seconds(), 60);
        assert_eq!(config.lockout_threshold(), 3);
    }

    #[test]
    fn session_cookie_secure_tracks_scheme() {
        let secure = AuthConfig::new("https://kurso.dev".to_string());
        assert!(secure.session_cookie_secure());

        let insecure = AuthConfig::new("http://localhost:5173".to_string());
        assert!(!insecure.session_cookie_secure());
    }

    #[test]
    fn auth_state_exposes_config() {
        let state = AuthState::new(AuthConfig::new("https://kurso.dev".to_string()));
        assert_eq!(state.config().frontend_base_url(), "https://kurso.dev");
    }
}
