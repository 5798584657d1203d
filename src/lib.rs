//! # Kurso (Learning Management System backend)
//!
//! `kurso` is the backend for a course platform: user registration and
//! login (password and OAuth), server-side sessions, password reset and
//! email verification, and paid course enrollment through an external
//! payment gateway.
//!
//! ## Authentication & sessions
//!
//! Passwords are stored as Argon2 hashes. Logins are throttled per email
//! address: ten failed attempts within a fifteen-minute window lock the
//! address out until the window elapses. Successful logins create a
//! server-side session row; the browser only ever holds an opaque random
//! token (the database stores its SHA-256 hash). "Remember me" logins get
//! a long-lived session instead of a separate token family.
//!
//! ## Payments & enrollment
//!
//! A payment starts as a `pending` transaction row, is handed to the
//! gateway for checkout, and is completed either by the user returning
//! through the verify endpoint or by the gateway's signed webhook —
//! whichever arrives first. Both paths are idempotent: transaction
//! completion is a guarded compare-and-set and enrollment insertion treats
//! a unique-constraint violation as "already enrolled", so the redirect
//! and webhook paths can race safely.
//!
//! ## Email
//!
//! Verification and reset mails go through a transactional outbox table
//! drained by a background worker; delivery failures are retried with
//! backoff and never affect the request that enqueued them.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
