//! Password hashing with scheme migration.
//!
//! Stored records self-describe their scheme through the PHC prefix, so
//! multiple schemes coexist and old ones are upgraded lazily: a successful
//! verify against a deprecated record reports a replacement hash for the
//! caller to persist.

use anyhow::{Result, anyhow};
use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
};
use argon2::Argon2;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use pbkdf2::Pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::SecurityConfig;
use crate::error::ConfigError;

const PLAINTEXT_PREFIX: &str = "$plain$";
// passlib's pbkdf2_sha512 default.
const PBKDF2_ROUNDS: u32 = 29_000;
const PBKDF2_OUTPUT_LENGTH: usize = 64;

/// A supported hash scheme.
///
/// `Plaintext` is a no-op scheme for test and dev configurations. Nothing
/// stops a deployment from listing it in production; keeping it out of the
/// allowed list is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Argon2,
    Pbkdf2Sha512,
    Plaintext,
}

impl Scheme {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "argon2" => Some(Scheme::Argon2),
            "pbkdf2_sha512" => Some(Scheme::Pbkdf2Sha512),
            "plaintext" => Some(Scheme::Plaintext),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Scheme::Argon2 => "argon2",
            Scheme::Pbkdf2Sha512 => "pbkdf2_sha512",
            Scheme::Plaintext => "plaintext",
        }
    }

    /// Identify the scheme of a stored record from its prefix.
    #[must_use]
    pub fn of_record(record: &str) -> Option<Self> {
        if record.starts_with("$argon2") {
            Some(Scheme::Argon2)
        } else if record.starts_with("$pbkdf2-sha512$") {
            Some(Scheme::Pbkdf2Sha512)
        } else if record.starts_with(PLAINTEXT_PREFIX) {
            Some(Scheme::Plaintext)
        } else {
            None
        }
    }
}

/// Multi-scheme hashing context built from [`SecurityConfig`].
pub struct HashContext {
    default_scheme: Scheme,
    allowed: Vec<Scheme>,
    deprecated: Vec<Scheme>,
    /// `None` in single-hash mode; otherwise the HMAC-SHA512 pepper applied
    /// before the scheme sees the plaintext.
    pepper: Option<SecretString>,
}

impl HashContext {
    /// Build the context, resolving scheme names and the `"auto"` deprecation
    /// marker (every allowed scheme except the default).
    ///
    /// # Errors
    ///
    /// Returns the same configuration errors as
    /// [`SecurityConfig::validate`] for the hashing options.
    pub fn from_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        let mut allowed = Vec::new();
        for name in config.password_schemes() {
            let scheme =
                Scheme::from_name(name).ok_or_else(|| ConfigError::UnknownScheme(name.clone()))?;
            allowed.push(scheme);
        }
        let default_scheme = Scheme::from_name(config.password_scheme())
            .ok_or_else(|| ConfigError::UnknownScheme(config.password_scheme().to_string()))?;
        if !allowed.contains(&default_scheme) {
            return Err(ConfigError::SchemeNotAllowed(
                config.password_scheme().to_string(),
            ));
        }

        let deprecated = if config.deprecated_password_schemes() == ["auto"] {
            allowed
                .iter()
                .copied()
                .filter(|scheme| *scheme != default_scheme)
                .collect()
        } else {
            let mut resolved = Vec::new();
            for name in config.deprecated_password_schemes() {
                let scheme = Scheme::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownScheme(name.clone()))?;
                if !allowed.contains(&scheme) {
                    return Err(ConfigError::DeprecatedSchemeNotAllowed(name.clone()));
                }
                resolved.push(scheme);
            }
            resolved
        };

        if config.password_single_hash() {
            Ok(Self {
                default_scheme,
                allowed,
                deprecated,
                pepper: None,
            })
        } else {
            Ok(Self {
                default_scheme,
                allowed,
                deprecated,
                pepper: Some(SecretString::from(config.password_pepper().to_string())),
            })
        }
    }

    /// Hash with the default scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the hashing backend fails.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        self.hash_with(plaintext, self.default_scheme)
    }

    /// Hash with an explicit scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SchemeNotAllowed`] for schemes outside the
    /// allowed list, or a backend error.
    pub fn hash_with(&self, plaintext: &str, scheme: Scheme) -> Result<String> {
        if !self.allowed.contains(&scheme) {
            return Err(ConfigError::SchemeNotAllowed(scheme.name().to_string()).into());
        }
        let input = self.preprocess(plaintext, scheme)?;
        match scheme {
            Scheme::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                Ok(Argon2::default()
                    .hash_password(input.as_bytes(), &salt)
                    .map_err(|_| anyhow!("argon2 hashing failed"))?
                    .to_string())
            }
            Scheme::Pbkdf2Sha512 => {
                let salt = SaltString::generate(&mut OsRng);
                Ok(Pbkdf2
                    .hash_password_customized(
                        input.as_bytes(),
                        Some(pbkdf2::Algorithm::Pbkdf2Sha512.ident()),
                        None,
                        pbkdf2::Params {
                            rounds: PBKDF2_ROUNDS,
                            output_length: PBKDF2_OUTPUT_LENGTH,
                        },
                        &salt,
                    )
                    .map_err(|_| anyhow!("pbkdf2 hashing failed"))?
                    .to_string())
            }
            Scheme::Plaintext => Ok(format!("{PLAINTEXT_PREFIX}{input}")),
        }
    }

    /// Verify plaintext against a stored record of any recognized scheme.
    #[must_use]
    pub fn verify(&self, plaintext: &str, record: &str) -> bool {
        let Some(scheme) = Scheme::of_record(record) else {
            warn!("stored password hash has an unrecognized scheme prefix");
            return false;
        };
        let Ok(input) = self.preprocess(plaintext, scheme) else {
            return false;
        };
        match scheme {
            Scheme::Argon2 => PasswordHash::new(record).is_ok_and(|parsed| {
                Argon2::default()
                    .verify_password(input.as_bytes(), &parsed)
                    .is_ok()
            }),
            Scheme::Pbkdf2Sha512 => PasswordHash::new(record).is_ok_and(|parsed| {
                Pbkdf2.verify_password(input.as_bytes(), &parsed).is_ok()
            }),
            Scheme::Plaintext => {
                let stored = &record[PLAINTEXT_PREFIX.len()..];
                stored.as_bytes().ct_eq(input.as_bytes()).into()
            }
        }
    }

    /// Whether a stored record should be upgraded: its scheme is deprecated,
    /// or its cost parameters differ from what hashing produces today.
    #[must_use]
    pub fn needs_rehash(&self, record: &str) -> bool {
        let Some(scheme) = Scheme::of_record(record) else {
            return true;
        };
        if self.deprecated.contains(&scheme) {
            return true;
        }
        match scheme {
            Scheme::Argon2 => !argon2_params_current(record),
            Scheme::Pbkdf2Sha512 => !pbkdf2_rounds_current(record),
            Scheme::Plaintext => false,
        }
    }

    /// Verify and, on success against a deprecated record, produce the
    /// replacement hash for the caller to persist. Correctness is always
    /// judged against the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error only if rehashing the verified plaintext fails.
    pub fn verify_and_update(&self, plaintext: &str, record: &str) -> Result<(bool, Option<String>)> {
        if !self.verify(plaintext, record) {
            return Ok((false, None));
        }
        if self.needs_rehash(record) {
            let upgraded = self.hash(plaintext)?;
            return Ok((true, Some(upgraded)));
        }
        Ok((true, None))
    }

    /// Apply the double-hash pre-step: HMAC-SHA512 under the pepper, base64
    /// encoded. Bounds the effective input length and mixes in a server-side
    /// secret. Skipped in single-hash mode and for the plaintext scheme.
    fn preprocess(&self, plaintext: &str, scheme: Scheme) -> Result<String> {
        let Some(pepper) = &self.pepper else {
            return Ok(plaintext.to_string());
        };
        if scheme == Scheme::Plaintext {
            return Ok(plaintext.to_string());
        }
        let mut mac = Hmac::<Sha512>::new_from_slice(pepper.expose_secret().as_bytes())
            .map_err(|_| anyhow!("invalid password pepper"))?;
        mac.update(plaintext.as_bytes());
        Ok(Base64::encode_string(&mac.finalize().into_bytes()))
    }
}

fn argon2_params_current(record: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(record) else {
        return false;
    };
    let Ok(params) = argon2::Params::try_from(&parsed) else {
        return false;
    };
    let current = argon2::Params::default();
    params.m_cost() == current.m_cost()
        && params.t_cost() == current.t_cost()
        && params.p_cost() == current.p_cost()
}

fn pbkdf2_rounds_current(record: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(record) else {
        return false;
    };
    parsed
        .params
        .iter()
        .find(|(ident, _)| ident.as_str() == "i")
        .and_then(|(_, value)| value.decimal().ok())
        .is_some_and(|rounds| rounds == PBKDF2_ROUNDS)
}
