//! Credential verification: the single authority for "is this login valid".

use anyhow::Result;
use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::config::SecurityConfig;
use crate::hash::HashContext;
use crate::store::{LookupKey, Principal, PrincipalId, UserStore, resolve};
use crate::token::{TokenCodec, TokenPurpose};

/// Discriminated login result. Never an error: the caller decides which
/// user-facing message each variant maps to (see [`crate::messages`]).
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(Principal),
    NoSuchUser,
    /// Principal has no usable credential (e.g. a social-only account).
    NoPasswordSet,
    WrongPassword,
    /// Confirmation is mandated and the principal never confirmed.
    ConfirmationRequired,
    /// `active == false`.
    Disabled,
    /// Token-based login only: malformed, tampered, expired, or stale token.
    InvalidToken,
}

/// Fingerprint of a stored password hash, embedded in auth and remember
/// tokens so that any password change invalidates them.
pub(crate) fn password_fingerprint(password_hash: &str) -> String {
    let digest = Sha512::digest(password_hash.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

pub struct CredentialVerifier<'a> {
    config: &'a SecurityConfig,
    hasher: &'a HashContext,
    codec: &'a TokenCodec,
    users: &'a dyn UserStore,
}

impl<'a> CredentialVerifier<'a> {
    #[must_use]
    pub fn new(
        config: &'a SecurityConfig,
        hasher: &'a HashContext,
        codec: &'a TokenCodec,
        users: &'a dyn UserStore,
    ) -> Self {
        Self {
            config,
            hasher,
            codec,
            users,
        }
    }

    /// Validate form credentials.
    ///
    /// The check order is load-bearing: lookup, password-set, password
    /// verify (persisting a rehash before returning on success), mandatory
    /// confirmation, active. Each check short-circuits and selects the
    /// user-facing message.
    ///
    /// # Errors
    ///
    /// Returns an error only for store or hashing failures, never for bad
    /// credentials.
    pub fn verify_login(&self, identity: &str, password: &str) -> Result<LoginOutcome> {
        let key = LookupKey::Identity(identity.to_string());
        let Some(mut principal) =
            resolve(self.users, self.config.user_identity_attributes(), &key)?
        else {
            return Ok(LoginOutcome::NoSuchUser);
        };

        let Some(stored) = principal.password_hash.clone().filter(|hash| !hash.is_empty())
        else {
            return Ok(LoginOutcome::NoPasswordSet);
        };

        // Correctness is judged against the old record; the upgrade is a
        // side effect persisted before we report success.
        let (ok, upgraded) = self.hasher.verify_and_update(password, &stored)?;
        if !ok {
            return Ok(LoginOutcome::WrongPassword);
        }
        if let Some(upgraded) = upgraded {
            debug!(principal = principal.id, "upgrading deprecated password hash");
            principal.password_hash = Some(upgraded);
            self.users.save(&principal, true)?;
        }

        if self.config.confirmable()
            && !self.config.login_without_confirmation()
            && !principal.is_confirmed()
        {
            return Ok(LoginOutcome::ConfirmationRequired);
        }
        if !principal.active {
            return Ok(LoginOutcome::Disabled);
        }
        Ok(LoginOutcome::Authenticated(principal))
    }

    /// Validate an auth token (API authentication).
    ///
    /// All token failures collapse into `InvalidToken` so the response never
    /// discloses why a presented token stopped working.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures.
    pub fn verify_token_login(&self, token: &str) -> Result<LoginOutcome> {
        let Ok(window) = self.config.window_for(TokenPurpose::Auth) else {
            return Ok(LoginOutcome::InvalidToken);
        };
        let Ok(data) = self.codec.parse(token, TokenPurpose::Auth, window) else {
            return Ok(LoginOutcome::InvalidToken);
        };
        let Some(principal) = principal_for_fingerprint_payload(self.users, &data.payload)?
        else {
            return Ok(LoginOutcome::InvalidToken);
        };
        if !principal.active {
            return Ok(LoginOutcome::Disabled);
        }
        Ok(LoginOutcome::Authenticated(principal))
    }

    /// Payload for auth and remember tokens issued to `principal`.
    pub(crate) fn fingerprint_payload(principal: &Principal) -> Vec<String> {
        let current = principal.password_hash.as_deref().unwrap_or_default();
        vec![principal.id.to_string(), password_fingerprint(current)]
    }
}

/// Resolve a `[id, password-hash-fingerprint]` payload to a principal,
/// rejecting it when the fingerprint no longer matches the stored hash.
///
/// # Errors
///
/// Returns an error only for store failures.
pub(crate) fn principal_for_fingerprint_payload(
    users: &dyn UserStore,
    payload: &[String],
) -> Result<Option<Principal>> {
    let [id_raw, fingerprint] = payload else {
        return Ok(None);
    };
    let Ok(id) = id_raw.parse::<PrincipalId>() else {
        return Ok(None);
    };
    let Some(principal) = users.find_by_id(id)? else {
        return Ok(None);
    };
    let current = principal.password_hash.as_deref().unwrap_or_default();
    if password_fingerprint(current) != *fingerprint {
        debug!(principal = id, "token fingerprint does not match stored hash");
        return Ok(None);
    }
    Ok(Some(principal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::hash::Scheme;
    use crate::store::MemoryUserStore;
    use anyhow::Result;

    struct Fixture {
        config: SecurityConfig,
        hasher: HashContext,
        codec: TokenCodec,
        users: MemoryUserStore,
    }

    impl Fixture {
        fn new(config: SecurityConfig) -> Result<Self> {
            let hasher = HashContext::from_config(&config)?;
            let codec = TokenCodec::from_config(&config);
            Ok(Self {
                config,
                hasher,
                codec,
                users: MemoryUserStore::new(),
            })
        }

        fn verifier(&self) -> CredentialVerifier<'_> {
            CredentialVerifier::new(&self.config, &self.hasher, &self.codec, &self.users)
        }

        fn add_user(&self, email: &str, password: Option<&str>, active: bool) -> Result<Principal> {
            let hash = match password {
                Some(password) => Some(self.hasher.hash(password)?),
                None => None,
            };
            self.users.create(email, hash, active)
        }
    }

    #[test]
    fn check_order_short_circuits() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k"))?;
        let verifier = fixture.verifier();

        assert_eq!(
            verifier.verify_login("missing@example.com", "pw")?,
            LoginOutcome::NoSuchUser
        );

        fixture.add_user("social@example.com", None, true)?;
        assert_eq!(
            verifier.verify_login("social@example.com", "pw")?,
            LoginOutcome::NoPasswordSet
        );

        fixture.add_user("u@example.com", Some("password123"), true)?;
        assert_eq!(
            verifier.verify_login("u@example.com", "wrong")?,
            LoginOutcome::WrongPassword
        );

        match verifier.verify_login("u@example.com", "password123")? {
            LoginOutcome::Authenticated(principal) => {
                assert_eq!(principal.email, "u@example.com");
            }
            other => panic!("expected authentication, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn disabled_account_is_reported_after_password_check() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k"))?;
        fixture.add_user("u@example.com", Some("password123"), false)?;
        let verifier = fixture.verifier();

        // Wrong password wins over the disabled state.
        assert_eq!(
            verifier.verify_login("u@example.com", "wrong")?,
            LoginOutcome::WrongPassword
        );
        assert_eq!(
            verifier.verify_login("u@example.com", "password123")?,
            LoginOutcome::Disabled
        );
        Ok(())
    }

    #[test]
    fn confirmation_gate_honors_override() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k").with_confirmable(true))?;
        fixture.add_user("u@example.com", Some("password123"), true)?;
        assert_eq!(
            fixture.verifier().verify_login("u@example.com", "password123")?,
            LoginOutcome::ConfirmationRequired
        );

        let fixture = Fixture::new(
            SecurityConfig::new("k")
                .with_confirmable(true)
                .with_login_without_confirmation(true),
        )?;
        fixture.add_user("u@example.com", Some("password123"), true)?;
        assert!(matches!(
            fixture.verifier().verify_login("u@example.com", "password123")?,
            LoginOutcome::Authenticated(_)
        ));
        Ok(())
    }

    #[test]
    fn successful_login_rehashes_deprecated_records() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k"))?;
        let old_hash = fixture.hasher.hash_with("password123", Scheme::Pbkdf2Sha512)?;
        let user = fixture.users.create("u@example.com", Some(old_hash.clone()), true)?;

        let outcome = fixture.verifier().verify_login("u@example.com", "password123")?;
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));

        let reloaded = fixture.users.find_by_id(user.id)?.expect("user exists");
        let new_hash = reloaded.password_hash.expect("hash present");
        assert_ne!(new_hash, old_hash);
        assert_eq!(Scheme::of_record(&new_hash), Some(Scheme::Argon2));
        assert_eq!(fixture.users.save_count(), 1);

        // Second login verifies against the upgraded record without saving.
        let outcome = fixture.verifier().verify_login("u@example.com", "password123")?;
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        assert_eq!(fixture.users.save_count(), 1);
        Ok(())
    }

    #[test]
    fn token_login_round_trip_and_invalidation() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k"))?;
        let mut user = fixture.add_user("u@example.com", Some("password123"), true)?;
        let verifier = fixture.verifier();

        let token = fixture.codec.issue(
            crate::token::TokenPurpose::Auth,
            &CredentialVerifier::fingerprint_payload(&user),
        )?;
        assert!(matches!(
            verifier.verify_token_login(&token)?,
            LoginOutcome::Authenticated(_)
        ));

        // Changing the password invalidates every outstanding auth token.
        user.password_hash = Some(fixture.hasher.hash("new-password-456")?);
        fixture.users.save(&user, true)?;
        assert_eq!(
            verifier.verify_token_login(&token)?,
            LoginOutcome::InvalidToken
        );
        Ok(())
    }

    #[test]
    fn token_login_rejects_garbage_and_unknown_users() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k"))?;
        let verifier = fixture.verifier();
        assert_eq!(
            verifier.verify_token_login("not-a-token")?,
            LoginOutcome::InvalidToken
        );

        let token = fixture.codec.issue(
            crate::token::TokenPurpose::Auth,
            &["999".to_string(), password_fingerprint("")],
        )?;
        assert_eq!(
            verifier.verify_token_login(&token)?,
            LoginOutcome::InvalidToken
        );
        Ok(())
    }
}
