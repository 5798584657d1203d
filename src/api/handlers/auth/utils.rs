//! Small helpers for auth validation, password hashing, and token handling.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng as HashOsRng},
};
use base64::Engine;
use once_cell::sync::Lazy;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Verified against when login hits an unknown email, so both failure paths
/// do comparable work.
static DUMMY_PASSWORD_HASH: Lazy<String> =
    Lazy::new(|| hash_password("kurso-dummy-credential").unwrap_or_default());

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Password policy: at least 8 characters.
pub(super) fn valid_password(password: &str) -> bool {
    password.chars().count() >= 8
}

/// Create a new random token for session cookies, email links, and OAuth
/// state values. The raw value is only sent to the client; the database
/// stores a hash.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn sha256(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a session token so raw values never touch the database.
/// The hash is used for lookups when the cookie is presented.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    sha256(token)
}

/// Hash an email verification token before storage or lookup.
pub(super) fn hash_verification_token(token: &str) -> Vec<u8> {
    sha256(token)
}

/// Hash a password reset token before storage or lookup.
pub(super) fn hash_reset_token(token: &str) -> Vec<u8> {
    sha256(token)
}

/// Hash an OAuth CSRF state value before storage or lookup.
pub(super) fn hash_oauth_state(state: &str) -> Vec<u8> {
    sha256(state)
}

/// Argon2id hash for storage in `users.password_hash`.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut HashOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a password against a stored hash; malformed hashes verify false.
pub(super) fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Burn a comparable amount of work when the email is unknown, keeping the
/// unknown-user and wrong-password paths indistinguishable.
pub(super) fn verify_dummy_password(password: &str) {
    let _ = verify_password(password, &DUMMY_PASSWORD_HASH);
}

/// Build the frontend verification link included in outbound emails.
pub(super) fn build_verify_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/verify-email#token={token}")
}

/// Build the frontend password-reset link included in outbound emails.
pub(super) fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}

/// Extract a client IP for login-attempt records from common proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_password_enforces_minimum_length() {
        assert!(valid_password("12345678"));
        assert!(valid_password("a much longer passphrase"));
        assert!(!valid_password("1234567"));
        assert!(!valid_password(""));
    }

    #[test]
    fn generate_token_round_trip() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn token_hashes_are_stable_and_distinct() {
        let first = hash_verification_token("token");
        let second = hash_verification_token("token");
        let different = hash_verification_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);

        // Same digest across purposes; the purposes differ only in storage.
        assert_eq!(hash_reset_token("token"), hash_session_token("token"));
        assert_eq!(hash_oauth_state("token"), hash_session_token("token"));
    }

    #[test]
    fn password_hash_verifies_round_trip() {
        let hash = hash_password("correct horse battery staple");
        assert!(hash.is_ok());
        if let Ok(hash) = hash {
            assert!(verify_password("correct horse battery staple", &hash));
            assert!(!verify_password("wrong password", &hash));
        }
    }

    #[test]
    fn verify_password_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn dummy_verification_does_not_panic() {
        verify_dummy_password("whatever");
    }

    #[test]
    fn build_verify_url_trims_trailing_slash() {
        let url = build_verify_url("https://kurso.dev/", "token");
        assert_eq!(url, "https://kurso.dev/verify-email#token=token");
    }

    #[test]
    fn build_reset_url_trims_trailing_slash() {
        let url = build_reset_url("https://kurso.dev/", "token");
        assert_eq!(url, "https://kurso.dev/reset-password#token=token");
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }
}
