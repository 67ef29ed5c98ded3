//! Signed, time-limited tokens.
//!
//! Tokens are `body.signature` strings: the body is base64url-encoded JSON
//! carrying a small string payload and an issued-at timestamp, the signature
//! is HMAC-SHA512 under a key derived from the secret and a purpose-specific
//! salt. Distinct purposes use distinct salts, so a token minted for one
//! purpose never verifies under another.
//!
//! There is no server-side revocation: single-use purposes (confirm, reset)
//! stay replayable until natural expiry. Known gap, kept deliberately.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SecurityConfig;
use crate::error::{ConfigError, TokenError};

type HmacSha512 = Hmac<Sha512>;

/// Token categories, each with its own signing salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    Confirm,
    Reset,
    Remember,
    Auth,
}

impl TokenPurpose {
    pub const ALL: [TokenPurpose; 4] = [
        TokenPurpose::Confirm,
        TokenPurpose::Reset,
        TokenPurpose::Remember,
        TokenPurpose::Auth,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::Confirm => "confirm",
            TokenPurpose::Reset => "reset",
            TokenPurpose::Remember => "remember",
            TokenPurpose::Auth => "auth",
        }
    }
}

/// A validity window parsed from a `"<integer> <unit>"` string.
///
/// Negative values are legal and simply mean "already expired"; tests use
/// `"-1 seconds"` to force expiry without clock tricks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAge {
    limit_seconds: Option<i64>,
}

impl MaxAge {
    pub const UNLIMITED: MaxAge = MaxAge {
        limit_seconds: None,
    };

    #[must_use]
    pub fn seconds(limit: i64) -> Self {
        Self {
            limit_seconds: Some(limit),
        }
    }

    /// Parse a human window such as `"5 days"` or `"-1 seconds"`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDuration` when the string is not
    /// `"<integer> <unit>"` with a known unit.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidDuration(input.to_string());
        let mut parts = input.split_whitespace();
        let amount: i64 = parts
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(invalid)?;
        let unit = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        let per_unit = match unit.to_ascii_lowercase().as_str() {
            "second" | "seconds" => 1,
            "minute" | "minutes" => 60,
            "hour" | "hours" => 3600,
            "day" | "days" => 86_400,
            "week" | "weeks" => 604_800,
            _ => return Err(invalid()),
        };
        let total = amount.checked_mul(per_unit).ok_or_else(invalid)?;
        Ok(Self::seconds(total))
    }

    #[must_use]
    pub fn limit_seconds(self) -> Option<i64> {
        self.limit_seconds
    }

    fn allows(self, age_seconds: i64) -> bool {
        self.limit_seconds.is_none_or(|limit| age_seconds <= limit)
    }
}

impl std::str::FromStr for MaxAge {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

/// A successfully validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub payload: Vec<String>,
    pub age_seconds: i64,
}

#[derive(Serialize, Deserialize)]
struct TokenBody {
    p: Vec<String>,
    iat: i64,
}

/// Issues and validates purpose-salted signed tokens.
pub struct TokenCodec {
    secret: Vec<u8>,
    confirm_salt: String,
    reset_salt: String,
    remember_salt: String,
    auth_salt: String,
}

impl TokenCodec {
    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            secret: config.secret_key().as_bytes().to_vec(),
            confirm_salt: config.salt_for(TokenPurpose::Confirm).to_string(),
            reset_salt: config.salt_for(TokenPurpose::Reset).to_string(),
            remember_salt: config.salt_for(TokenPurpose::Remember).to_string(),
            auth_salt: config.salt_for(TokenPurpose::Auth).to_string(),
        }
    }

    fn salt(&self, purpose: TokenPurpose) -> &str {
        match purpose {
            TokenPurpose::Confirm => &self.confirm_salt,
            TokenPurpose::Reset => &self.reset_salt,
            TokenPurpose::Remember => &self.remember_salt,
            TokenPurpose::Auth => &self.auth_salt,
        }
    }

    fn mac(&self, purpose: TokenPurpose) -> Result<HmacSha512, TokenError> {
        // Derived key: HMAC(secret, purpose salt). Any key length is valid
        // for HMAC, so failures here are unreachable in practice.
        let mut derive =
            HmacSha512::new_from_slice(&self.secret).map_err(|_| TokenError::Invalid)?;
        derive.update(self.salt(purpose).as_bytes());
        let key = derive.finalize().into_bytes();
        HmacSha512::new_from_slice(&key).map_err(|_| TokenError::Invalid)
    }

    /// Issue a token for `purpose` carrying `payload`, stamped with the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid` if the payload cannot be encoded.
    pub fn issue(&self, purpose: TokenPurpose, payload: &[String]) -> Result<String, TokenError> {
        self.issue_at(purpose, payload, now_unix())
    }

    /// Issue with an explicit issued-at timestamp (deterministic tests).
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid` if the payload cannot be encoded.
    pub fn issue_at(
        &self,
        purpose: TokenPurpose,
        payload: &[String],
        issued_at_unix: i64,
    ) -> Result<String, TokenError> {
        let body = TokenBody {
            p: payload.to_vec(),
            iat: issued_at_unix,
        };
        let json = serde_json::to_vec(&body).map_err(|_| TokenError::Invalid)?;
        let body_b64 = Base64UrlUnpadded::encode_string(&json);

        let mut mac = self.mac(purpose)?;
        mac.update(body_b64.as_bytes());
        let sig_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{body_b64}.{sig_b64}"))
    }

    /// Validate a token against `purpose` and `max_age` at the current time.
    ///
    /// # Errors
    ///
    /// - `TokenError::Invalid` for malformed tokens, signature mismatches,
    ///   and cross-purpose replays.
    /// - `TokenError::Expired` when the signature is good but the token is
    ///   older than `max_age`; the payload is still recoverable.
    pub fn parse(
        &self,
        token: &str,
        purpose: TokenPurpose,
        max_age: MaxAge,
    ) -> Result<TokenData, TokenError> {
        self.parse_at(token, purpose, max_age, now_unix())
    }

    /// Validate against an explicit clock (deterministic tests).
    ///
    /// # Errors
    ///
    /// Same as [`TokenCodec::parse`].
    pub fn parse_at(
        &self,
        token: &str,
        purpose: TokenPurpose,
        max_age: MaxAge,
        now_unix_seconds: i64,
    ) -> Result<TokenData, TokenError> {
        let mut parts = token.split('.');
        let body_b64 = parts.next().ok_or(TokenError::Invalid)?;
        let sig_b64 = parts.next().ok_or(TokenError::Invalid)?;
        if parts.next().is_some() {
            return Err(TokenError::Invalid);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Invalid)?;
        let mut mac = self.mac(purpose)?;
        mac.update(body_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let json = Base64UrlUnpadded::decode_vec(body_b64).map_err(|_| TokenError::Invalid)?;
        let body: TokenBody = serde_json::from_slice(&json).map_err(|_| TokenError::Invalid)?;

        let age_seconds = now_unix_seconds - body.iat;
        if !max_age.allows(age_seconds) {
            return Err(TokenError::Expired {
                payload: body.p,
                age_seconds,
            });
        }
        Ok(TokenData {
            payload: body.p,
            age_seconds,
        })
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}
