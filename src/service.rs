//! High-level security flows: login, registration, email confirmation,
//! password reset and change.
//!
//! One service instance wires the configuration, hasher, token codec, user
//! store, mailer and identity watcher together. Every flow returns a
//! discriminated outcome; `Err` is reserved for infrastructure failures.

use anyhow::{Result, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::json;
use sha2::{Digest, Sha512};
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::error::{ConfigError, TokenError};
use crate::hash::HashContext;
use crate::input::{
    ChangePasswordInput, CredentialsInput, FieldError, RegistrationInput, ResetPasswordInput,
};
use crate::mail::{MailMessage, MailSender};
use crate::messages;
use crate::session::{IdentityWatcher, RequestContext, SessionManager};
use crate::store::{LookupKey, Principal, PrincipalId, UserStore, resolve};
use crate::token::{TokenCodec, TokenPurpose, now_unix};
use crate::verifier::{CredentialVerifier, LoginOutcome};

/// Fingerprint of the email address a confirmation token was issued for, so
/// the token dies if the address changes before it is used.
fn email_fingerprint(email: &str) -> String {
    let digest = Sha512::digest(email.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginResult {
    LoggedIn(Principal),
    Invalid(Vec<FieldError>),
    /// Credentials rejected; `message` is the user-facing string.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Invalid(Vec<FieldError>),
    Registered {
        principal: Principal,
        /// Present when confirmation is enabled; hand it to the mail
        /// template or the API response.
        confirmation_token: Option<String>,
        logged_in: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationSendOutcome {
    Sent { token: String },
    AlreadyConfirmed,
    NoSuchUser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(Principal),
    /// Token was valid but the account is already confirmed; nothing
    /// changes.
    AlreadyConfirmed(Principal),
    InvalidToken,
    /// Token is authentic but past the configured window; carries the
    /// affected principal so a fresh token can be offered.
    ExpiredToken(Principal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResetRequestOutcome {
    Sent { token: String },
    NoSuchUser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResetOutcome {
    Reset(Principal),
    Invalid(Vec<FieldError>),
    InvalidToken,
    ExpiredToken(Principal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    Changed(Principal),
    Invalid(Vec<FieldError>),
}

pub struct SecurityService<'a> {
    config: &'a SecurityConfig,
    hasher: HashContext,
    codec: TokenCodec,
    users: &'a dyn UserStore,
    mailer: &'a dyn MailSender,
    watcher: &'a dyn IdentityWatcher,
}

impl<'a> SecurityService<'a> {
    /// Build the service, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns the configuration error that would otherwise surface later
    /// as a runtime failure.
    pub fn new(
        config: &'a SecurityConfig,
        users: &'a dyn UserStore,
        mailer: &'a dyn MailSender,
        watcher: &'a dyn IdentityWatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let hasher = HashContext::from_config(config)?;
        let codec = TokenCodec::from_config(config);
        Ok(Self {
            config,
            hasher,
            codec,
            users,
            mailer,
            watcher,
        })
    }

    #[must_use]
    pub fn sessions(&self) -> SessionManager<'_> {
        SessionManager::new(self.config, &self.codec, self.users, self.watcher)
    }

    fn verifier(&self) -> CredentialVerifier<'_> {
        CredentialVerifier::new(self.config, &self.hasher, &self.codec, self.users)
    }

    /// Form login.
    ///
    /// # Errors
    ///
    /// Returns an error for store or hashing failures only.
    pub fn login(&self, ctx: &mut dyn RequestContext, input: &CredentialsInput) -> Result<LoginResult> {
        let errors = input.validate();
        if !errors.is_empty() {
            return Ok(LoginResult::Invalid(errors));
        }
        let outcome = self.verifier().verify_login(&input.identity, &input.password)?;
        match outcome {
            LoginOutcome::Authenticated(principal) => {
                let remember = input.remember || self.config.default_remember_me();
                self.sessions().login(ctx, &principal, remember)?;
                info!(principal = principal.id, "login succeeded");
                Ok(LoginResult::LoggedIn(principal))
            }
            other => {
                let message = messages::login_error_message(
                    &other,
                    self.config.user_identity_attributes(),
                )
                .unwrap_or_default();
                Ok(LoginResult::Failed { message })
            }
        }
    }

    pub fn logout(&self, ctx: &mut dyn RequestContext) {
        self.sessions().logout(ctx);
    }

    /// Register a new account.
    ///
    /// The account starts inactive when confirmation is required; otherwise
    /// it is active immediately and (by default) logged in.
    ///
    /// # Errors
    ///
    /// Returns an error when registration is disabled or the store, hasher,
    /// or mailer fails.
    pub fn register(
        &self,
        ctx: &mut dyn RequestContext,
        input: &RegistrationInput,
    ) -> Result<RegisterOutcome> {
        if !self.config.registerable() {
            bail!("registration is not enabled");
        }
        let errors = input.validate();
        if !errors.is_empty() {
            return Ok(RegisterOutcome::Invalid(errors));
        }
        let key = LookupKey::Identity(input.email.clone());
        if resolve(self.users, self.config.user_identity_attributes(), &key)?.is_some() {
            return Ok(RegisterOutcome::Invalid(vec![FieldError {
                field: "email",
                message: messages::EMAIL_ALREADY_ASSOCIATED.to_string(),
            }]));
        }

        let needs_confirmation =
            self.config.confirmable() && !self.config.login_without_confirmation();
        let hash = self.hasher.hash(&input.password)?;
        let principal = self
            .users
            .create(&input.email, Some(hash), !needs_confirmation)?;
        info!(principal = principal.id, "account registered");

        let confirmation_token = if self.config.confirmable() {
            Some(self.issue_confirmation_token(&principal)?)
        } else {
            None
        };

        if self.config.send_register_email() {
            self.mailer.send(MailMessage {
                subject: "Welcome".to_string(),
                to: principal.email.clone(),
                template: "welcome".to_string(),
                context: json!({
                    "email": principal.email,
                    "confirmation_token": confirmation_token,
                }),
            })?;
        }

        let logged_in = if self.config.auto_login_after_register() && !needs_confirmation {
            self.sessions().login(ctx, &principal, false)?
        } else {
            false
        };

        Ok(RegisterOutcome::Registered {
            principal,
            confirmation_token,
            logged_in,
        })
    }

    /// (Re)send confirmation instructions for an unconfirmed account.
    ///
    /// # Errors
    ///
    /// Returns an error when confirmation is disabled or the store or
    /// mailer fails.
    pub fn send_confirmation_instructions(&self, email: &str) -> Result<ConfirmationSendOutcome> {
        if !self.config.confirmable() {
            bail!("email confirmation is not enabled");
        }
        let key = LookupKey::Identity(email.to_string());
        let Some(principal) =
            resolve(self.users, self.config.user_identity_attributes(), &key)?
        else {
            return Ok(ConfirmationSendOutcome::NoSuchUser);
        };
        if principal.is_confirmed() {
            return Ok(ConfirmationSendOutcome::AlreadyConfirmed);
        }
        let token = self.issue_confirmation_token(&principal)?;
        self.mailer.send(MailMessage {
            subject: "Please confirm your email".to_string(),
            to: principal.email.clone(),
            template: "confirmation_instructions".to_string(),
            context: json!({
                "email": principal.email,
                "confirmation_token": token,
            }),
        })?;
        Ok(ConfirmationSendOutcome::Sent { token })
    }

    /// Redeem a confirmation token.
    ///
    /// Confirming switches the session to the confirmed principal when it
    /// differs from the currently logged-in one.
    ///
    /// # Errors
    ///
    /// Returns an error when confirmation is disabled or the store fails.
    pub fn confirm_email(
        &self,
        ctx: &mut dyn RequestContext,
        token: &str,
    ) -> Result<ConfirmOutcome> {
        if !self.config.confirmable() {
            bail!("email confirmation is not enabled");
        }
        let window = self.config.window_for(TokenPurpose::Confirm)?;
        let payload = match self.codec.parse(token, TokenPurpose::Confirm, window) {
            Ok(data) => data.payload,
            Err(TokenError::Expired { payload, .. }) => {
                return Ok(
                    match self.principal_for_email_payload(&payload)? {
                        Some(principal) => ConfirmOutcome::ExpiredToken(principal),
                        None => ConfirmOutcome::InvalidToken,
                    },
                );
            }
            Err(TokenError::Invalid) => return Ok(ConfirmOutcome::InvalidToken),
        };
        let Some(mut principal) = self.principal_for_email_payload(&payload)? else {
            return Ok(ConfirmOutcome::InvalidToken);
        };
        if principal.is_confirmed() {
            return Ok(ConfirmOutcome::AlreadyConfirmed(principal));
        }

        principal.confirmed_at = Some(now_unix());
        principal.active = true;
        self.users.save(&principal, true)?;
        info!(principal = principal.id, "email confirmed");

        // Confirming on a browser that is logged in as someone else replaces
        // that session.
        let current = self.sessions().current_principal(ctx)?;
        if current.as_ref().map(|user| user.id) != Some(principal.id) {
            self.sessions().logout(ctx);
            self.sessions().force_login(ctx, &principal, false)?;
        }
        Ok(ConfirmOutcome::Confirmed(principal))
    }

    /// Start a password reset.
    ///
    /// The token embeds the current hash fingerprint, so completing the
    /// reset (or any other password change) invalidates it.
    ///
    /// # Errors
    ///
    /// Returns an error when recovery is disabled or the store or mailer
    /// fails.
    pub fn request_password_reset(&self, email: &str) -> Result<ResetRequestOutcome> {
        if !self.config.recoverable() {
            bail!("password recovery is not enabled");
        }
        let key = LookupKey::Identity(email.to_string());
        let Some(principal) =
            resolve(self.users, self.config.user_identity_attributes(), &key)?
        else {
            return Ok(ResetRequestOutcome::NoSuchUser);
        };
        let token = self.codec.issue(
            TokenPurpose::Reset,
            &CredentialVerifier::fingerprint_payload(&principal),
        )?;
        if self.config.send_password_reset_email() {
            self.mailer.send(MailMessage {
                subject: "Password reset instructions".to_string(),
                to: principal.email.clone(),
                template: "reset_instructions".to_string(),
                context: json!({
                    "email": principal.email,
                    "reset_token": token,
                }),
            })?;
        }
        debug!(principal = principal.id, "password reset requested");
        Ok(ResetRequestOutcome::Sent { token })
    }

    /// Complete a password reset and log the principal in.
    ///
    /// # Errors
    ///
    /// Returns an error when recovery is disabled or the store, hasher, or
    /// mailer fails.
    pub fn complete_password_reset(
        &self,
        ctx: &mut dyn RequestContext,
        token: &str,
        input: &ResetPasswordInput,
    ) -> Result<ResetOutcome> {
        if !self.config.recoverable() {
            bail!("password recovery is not enabled");
        }
        let window = self.config.window_for(TokenPurpose::Reset)?;
        let payload = match self.codec.parse(token, TokenPurpose::Reset, window) {
            Ok(data) => data.payload,
            Err(TokenError::Expired { payload, .. }) => {
                return Ok(
                    match crate::verifier::principal_for_fingerprint_payload(
                        self.users, &payload,
                    )? {
                        Some(principal) => ResetOutcome::ExpiredToken(principal),
                        None => ResetOutcome::InvalidToken,
                    },
                );
            }
            Err(TokenError::Invalid) => return Ok(ResetOutcome::InvalidToken),
        };
        let Some(mut principal) =
            crate::verifier::principal_for_fingerprint_payload(self.users, &payload)?
        else {
            return Ok(ResetOutcome::InvalidToken);
        };
        let errors = input.validate();
        if !errors.is_empty() {
            return Ok(ResetOutcome::Invalid(errors));
        }

        principal.password_hash = Some(self.hasher.hash(&input.password)?);
        self.users.save(&principal, true)?;
        info!(principal = principal.id, "password reset completed");

        if self.config.send_password_reset_notice_email() {
            self.mailer.send(MailMessage {
                subject: "Your password has been reset".to_string(),
                to: principal.email.clone(),
                template: "reset_notice".to_string(),
                context: json!({ "email": principal.email }),
            })?;
        }
        self.sessions().login(ctx, &principal, false)?;
        Ok(ResetOutcome::Reset(principal))
    }

    /// Change the password of an authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns an error when password change is disabled or the store,
    /// hasher, or mailer fails.
    pub fn change_password(
        &self,
        ctx: &mut dyn RequestContext,
        principal: &Principal,
        input: &ChangePasswordInput,
    ) -> Result<ChangeOutcome> {
        if !self.config.changeable() {
            bail!("password change is not enabled");
        }
        let errors = input.validate();
        if !errors.is_empty() {
            return Ok(ChangeOutcome::Invalid(errors));
        }
        let stored = principal.password_hash.clone().unwrap_or_default();
        if !self.hasher.verify(&input.current_password, &stored) {
            return Ok(ChangeOutcome::Invalid(vec![FieldError {
                field: "current_password",
                message: messages::INVALID_PASSWORD.to_string(),
            }]));
        }
        if input.new_password == input.current_password {
            return Ok(ChangeOutcome::Invalid(vec![FieldError {
                field: "new_password",
                message: messages::PASSWORD_IS_THE_SAME.to_string(),
            }]));
        }

        let mut updated = principal.clone();
        updated.password_hash = Some(self.hasher.hash(&input.new_password)?);
        self.users.save(&updated, true)?;
        info!(principal = updated.id, "password changed");

        if self.config.send_password_changed_email() {
            self.mailer.send(MailMessage {
                subject: "Your password has been changed".to_string(),
                to: updated.email.clone(),
                template: "change_notice".to_string(),
                context: json!({ "email": updated.email }),
            })?;
        }
        // Re-establish the session under the new hash so the remember
        // cookie, if any, carries the new fingerprint.
        let had_remember = ctx.remember_cookie().is_some();
        self.sessions().login(ctx, &updated, had_remember)?;
        Ok(ChangeOutcome::Changed(updated))
    }

    /// Issue a per-request API token for `principal`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue_auth_token(&self, principal: &Principal) -> Result<String, TokenError> {
        self.codec.issue(
            TokenPurpose::Auth,
            &CredentialVerifier::fingerprint_payload(principal),
        )
    }

    /// Issue a remember token for `principal`, for hosts that manage the
    /// cookie themselves instead of going through
    /// [`SessionManager::login`].
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue_remember_token(&self, principal: &Principal) -> Result<String, TokenError> {
        self.codec.issue(
            TokenPurpose::Remember,
            &CredentialVerifier::fingerprint_payload(principal),
        )
    }

    fn issue_confirmation_token(&self, principal: &Principal) -> Result<String, TokenError> {
        self.codec.issue(
            TokenPurpose::Confirm,
            &[
                principal.id.to_string(),
                email_fingerprint(&principal.email),
            ],
        )
    }

    /// Resolve a `[id, email-fingerprint]` confirmation payload, rejecting
    /// it when the address changed since issuance.
    fn principal_for_email_payload(&self, payload: &[String]) -> Result<Option<Principal>> {
        let [id_raw, fingerprint] = payload else {
            return Ok(None);
        };
        let Ok(id) = id_raw.parse::<PrincipalId>() else {
            return Ok(None);
        };
        let Some(principal) = self.users.find_by_id(id)? else {
            return Ok(None);
        };
        if email_fingerprint(&principal.email) != *fingerprint {
            return Ok(None);
        }
        Ok(Some(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::RecordingMailer;
    use crate::session::{MemoryContext, NoopWatcher, SESSION_IDENTITY_KEY};
    use crate::store::MemoryUserStore;
    use std::sync::Mutex;

    struct RecordingWatcher {
        events: Mutex<Vec<Option<PrincipalId>>>,
    }

    impl RecordingWatcher {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<Option<PrincipalId>> {
            self.events.lock().expect("watcher lock poisoned").clone()
        }
    }

    impl IdentityWatcher for RecordingWatcher {
        fn identity_changed(&self, identity: Option<PrincipalId>) {
            self.events
                .lock()
                .expect("watcher lock poisoned")
                .push(identity);
        }
    }

    struct Fixture {
        config: SecurityConfig,
        users: MemoryUserStore,
        mailer: RecordingMailer,
    }

    impl Fixture {
        fn new(config: SecurityConfig) -> Self {
            Self {
                config,
                users: MemoryUserStore::new(),
                mailer: RecordingMailer::new(),
            }
        }

        fn service(&self) -> Result<SecurityService<'_>, ConfigError> {
            SecurityService::new(&self.config, &self.users, &self.mailer, &NoopWatcher)
        }
    }

    fn full_featured(secret: &str) -> SecurityConfig {
        SecurityConfig::new(secret)
            .with_registerable(true)
            .with_confirmable(true)
            .with_recoverable(true)
            .with_changeable(true)
    }

    #[test]
    fn register_without_confirmation_logs_in() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k").with_registerable(true));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();

        let outcome = service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?;
        let RegisterOutcome::Registered {
            principal,
            confirmation_token,
            logged_in,
        } = outcome
        else {
            panic!("expected registration, got {outcome:?}");
        };
        assert!(principal.active);
        assert!(confirmation_token.is_none());
        assert!(logged_in);
        assert_eq!(
            ctx.session_get(SESSION_IDENTITY_KEY),
            Some(principal.id.to_string())
        );

        let sent = fixture.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "welcome");
        Ok(())
    }

    #[test]
    fn register_with_confirmation_stays_inactive() -> Result<()> {
        let fixture = Fixture::new(full_featured("k"));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();

        let outcome = service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?;
        let RegisterOutcome::Registered {
            principal,
            confirmation_token,
            logged_in,
        } = outcome
        else {
            panic!("expected registration, got {outcome:?}");
        };
        assert!(!principal.active);
        assert!(!logged_in);
        let token = confirmation_token.expect("confirmation token issued");

        // Login is refused until the email is confirmed.
        let result = service.login(
            &mut ctx,
            &CredentialsInput::new("u@example.com", "password123"),
        )?;
        assert_eq!(
            result,
            LoginResult::Failed {
                message: messages::CONFIRMATION_REQUIRED.to_string()
            }
        );

        let confirmed = service.confirm_email(&mut ctx, &token)?;
        let ConfirmOutcome::Confirmed(principal) = confirmed else {
            panic!("expected confirmation, got {confirmed:?}");
        };
        assert!(principal.active);
        assert!(principal.is_confirmed());
        assert_eq!(
            ctx.session_get(SESSION_IDENTITY_KEY),
            Some(principal.id.to_string())
        );
        Ok(())
    }

    #[test]
    fn duplicate_email_is_rejected() -> Result<()> {
        let fixture = Fixture::new(SecurityConfig::new("k").with_registerable(true));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();
        let input = RegistrationInput::new("u@example.com", "password123", "password123");
        service.register(&mut ctx, &input)?;

        let outcome = service.register(&mut ctx, &input)?;
        let RegisterOutcome::Invalid(errors) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(errors[0].field, "email");
        assert_eq!(errors[0].message, messages::EMAIL_ALREADY_ASSOCIATED);
        Ok(())
    }

    #[test]
    fn confirmation_token_is_reusable_but_confirms_once() -> Result<()> {
        let fixture = Fixture::new(full_featured("k"));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();

        let RegisterOutcome::Registered {
            confirmation_token: Some(token),
            ..
        } = service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?
        else {
            panic!("expected confirmation token");
        };

        assert!(matches!(
            service.confirm_email(&mut ctx, &token)?,
            ConfirmOutcome::Confirmed(_)
        ));
        // Replaying the token is harmless.
        assert!(matches!(
            service.confirm_email(&mut ctx, &token)?,
            ConfirmOutcome::AlreadyConfirmed(_)
        ));
        Ok(())
    }

    #[test]
    fn confirming_a_different_principals_token_replaces_the_session() -> Result<()> {
        let fixture = Fixture::new(full_featured("k"));
        let watcher = RecordingWatcher::new();
        let service =
            SecurityService::new(&fixture.config, &fixture.users, &fixture.mailer, &watcher)?;
        let mut ctx = MemoryContext::new();

        let RegisterOutcome::Registered {
            confirmation_token: Some(token_a),
            ..
        } = service.register(
            &mut ctx,
            &RegistrationInput::new("a@example.com", "password123", "password123"),
        )?
        else {
            panic!("expected registration");
        };
        let ConfirmOutcome::Confirmed(alice) = service.confirm_email(&mut ctx, &token_a)? else {
            panic!("expected confirmation");
        };
        assert_eq!(
            ctx.session_get(SESSION_IDENTITY_KEY),
            Some(alice.id.to_string())
        );

        // While Alice's session is live, a token for a different account is
        // redeemed in the same browser.
        let RegisterOutcome::Registered {
            confirmation_token: Some(token_b),
            ..
        } = service.register(
            &mut ctx,
            &RegistrationInput::new("b@example.com", "password123", "password123"),
        )?
        else {
            panic!("expected registration");
        };
        let ConfirmOutcome::Confirmed(bob) = service.confirm_email(&mut ctx, &token_b)? else {
            panic!("expected confirmation");
        };

        // The session was torn down and rebuilt for Bob, not mutated in
        // place: each switch is a logout notification followed by a login.
        assert_eq!(
            ctx.session_get(SESSION_IDENTITY_KEY),
            Some(bob.id.to_string())
        );
        assert_eq!(
            watcher.events(),
            vec![None, Some(alice.id), None, Some(bob.id)]
        );
        Ok(())
    }

    #[test]
    fn resend_confirmation_instructions() -> Result<()> {
        let fixture = Fixture::new(full_featured("k"));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();
        service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?;

        let outcome = service.send_confirmation_instructions("u@example.com")?;
        let ConfirmationSendOutcome::Sent { token } = outcome else {
            panic!("expected token, got {outcome:?}");
        };
        service.confirm_email(&mut ctx, &token)?;

        assert_eq!(
            service.send_confirmation_instructions("u@example.com")?,
            ConfirmationSendOutcome::AlreadyConfirmed
        );
        assert_eq!(
            service.send_confirmation_instructions("nobody@example.com")?,
            ConfirmationSendOutcome::NoSuchUser
        );
        Ok(())
    }

    #[test]
    fn password_reset_flow() -> Result<()> {
        let fixture = Fixture::new(
            SecurityConfig::new("k")
                .with_registerable(true)
                .with_recoverable(true),
        );
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();
        service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?;
        service.logout(&mut ctx);

        let ResetRequestOutcome::Sent { token } =
            service.request_password_reset("u@example.com")?
        else {
            panic!("expected reset token");
        };

        let outcome = service.complete_password_reset(
            &mut ctx,
            &token,
            &ResetPasswordInput::new("new-password-456", "new-password-456"),
        )?;
        assert!(matches!(outcome, ResetOutcome::Reset(_)));

        // The token bound the old hash, so it cannot be redeemed twice.
        let outcome = service.complete_password_reset(
            &mut ctx,
            &token,
            &ResetPasswordInput::new("another-pass-789", "another-pass-789"),
        )?;
        assert_eq!(outcome, ResetOutcome::InvalidToken);

        // New password works, old one does not.
        let result = service.login(
            &mut ctx,
            &CredentialsInput::new("u@example.com", "new-password-456"),
        )?;
        assert!(matches!(result, LoginResult::LoggedIn(_)));
        Ok(())
    }

    #[test]
    fn change_password_rejects_same_and_wrong_current() -> Result<()> {
        let fixture = Fixture::new(
            SecurityConfig::new("k")
                .with_registerable(true)
                .with_changeable(true),
        );
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();
        let RegisterOutcome::Registered { principal, .. } = service.register(
            &mut ctx,
            &RegistrationInput::new("u@example.com", "password123", "password123"),
        )?
        else {
            panic!("expected registration");
        };

        let outcome = service.change_password(
            &mut ctx,
            &principal,
            &ChangePasswordInput::new("wrong-pass", "new-password-456", "new-password-456"),
        )?;
        let ChangeOutcome::Invalid(errors) = &outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(errors[0].message, messages::INVALID_PASSWORD);

        let outcome = service.change_password(
            &mut ctx,
            &principal,
            &ChangePasswordInput::new("password123", "password123", "password123"),
        )?;
        let ChangeOutcome::Invalid(errors) = &outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(errors[0].message, messages::PASSWORD_IS_THE_SAME);

        let outcome = service.change_password(
            &mut ctx,
            &principal,
            &ChangePasswordInput::new("password123", "new-password-456", "new-password-456"),
        )?;
        assert!(matches!(outcome, ChangeOutcome::Changed(_)));
        Ok(())
    }

    #[test]
    fn disabled_features_are_hard_errors() -> Result<(), ConfigError> {
        let fixture = Fixture::new(SecurityConfig::new("k"));
        let service = fixture.service()?;
        let mut ctx = MemoryContext::new();

        assert!(service
            .register(
                &mut ctx,
                &RegistrationInput::new("u@example.com", "password123", "password123"),
            )
            .is_err());
        assert!(service.request_password_reset("u@example.com").is_err());
        assert!(service.send_confirmation_instructions("u@example.com").is_err());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let fixture = Fixture::new(SecurityConfig::new("k").with_password_scheme("md5"));
        assert!(fixture.service().is_err());
    }
}
