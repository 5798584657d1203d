//! API handlers and shared utilities for Kurso.
//!
//! This module organizes the service's route handlers and provides common
//! helpers for validation and the JSON response envelope shared by the
//! auth and payment flows.

pub mod auth;
pub mod health;
pub mod payments;
pub mod root;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use utoipa::ToSchema;

/// Generic JSON envelope: `{"success": bool, "message": "..."}`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

impl ApiMessage {
    pub(crate) fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub(crate) fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Field-scoped validation errors: `{"success": false, "errors": {field: msg}}`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct FieldErrors {
    pub success: bool,
    pub errors: BTreeMap<String, String>,
}

impl FieldErrors {
    pub(crate) fn single(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        Self {
            success: false,
            errors,
        }
    }
}

/// Lightweight email sanity check used by auth handlers before persisting data.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Unix seconds, used for lockout arithmetic and token freshness checks.
pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// SQLSTATE 23505: unique constraint violation.
///
/// Both the session-token retry loop and idempotent enrollment depend on
/// recognizing this code, so it lives here rather than in one feature.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    /// Minimal `DatabaseError` for exercising SQLSTATE-dependent logic.
    #[derive(Debug)]
    pub(crate) struct TestDbError {
        pub(crate) code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestDbError;
    use super::*;

    #[test]
    fn valid_email_accepts_simple() {
        assert!(valid_email("user@example.com"));
    }

    #[test]
    fn valid_email_rejects_missing_at() {
        assert!(!valid_email("user.example.com"));
    }

    #[test]
    fn valid_email_rejects_missing_domain() {
        assert!(!valid_email("user@"));
    }

    #[test]
    fn api_message_shapes() {
        let ok = ApiMessage::ok("done");
        assert!(ok.success);
        assert_eq!(ok.message, "done");

        let err = ApiMessage::err("nope");
        assert!(!err.success);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn field_errors_single() {
        let errors = FieldErrors::single("email", "Invalid email");
        assert!(!errors.success);
        assert_eq!(errors.errors.get("email").map(String::as_str), Some("Invalid email"));
    }

    #[test]
    fn now_unix_seconds_is_positive() {
        assert!(now_unix_seconds() > 0);
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
