//! Error taxonomy.
//!
//! Configuration problems are fatal at startup and surface as [`ConfigError`].
//! Credential and token failures are values the caller inspects
//! ([`crate::verifier::LoginOutcome`], [`TokenError`]) so user-facing
//! messaging stays under the caller's control. Access checks terminate the
//! request with [`AccessDenied`].

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown password scheme: {0}")]
    UnknownScheme(String),
    #[error("password scheme {0} is not in the allowed scheme list")]
    SchemeNotAllowed(String),
    #[error("deprecated scheme {0} is not in the allowed scheme list")]
    DeprecatedSchemeNotAllowed(String),
    #[error("password_single_hash and a custom password_salt are mutually exclusive")]
    SingleHashWithSalt,
    #[error("token purpose salts must be distinct")]
    DuplicatePurposeSalt,
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

/// Outcome of a failed token parse.
///
/// `Expired` keeps the decoded payload so callers can drive "resend
/// instructions" flows for links that went stale.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired {
        payload: Vec<String>,
        age_seconds: i64,
    },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    /// No principal could be resolved for the request.
    #[error("unauthorized")]
    Unauthorized,
    /// A principal was resolved but fails the guard's constraints.
    #[error("forbidden")]
    Forbidden,
}
