//! Process-wide security configuration.
//!
//! Built once at startup, validated with [`SecurityConfig::validate`], and
//! passed by reference into every component. Nothing here is looked up
//! dynamically at call time.

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::hash::Scheme;
use crate::token::{MaxAge, TokenPurpose};

const DEFAULT_CONFIRM_EMAIL_WITHIN: &str = "5 days";
const DEFAULT_RESET_PASSWORD_WITHIN: &str = "5 days";
const DEFAULT_REMEMBER_TOKEN_WITHIN: &str = "365 days";
const DEFAULT_PASSWORD_SALT: &str = "security-password-salt";
const DEFAULT_POST_LOGIN_REDIRECT: &str = "/";

/// What to do with an unauthenticated browser request that hits a protected
/// handler. Machine-readable requests always get a bare 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthorizedBehavior {
    /// Terminate with `AccessDenied::Unauthorized`.
    Abort,
    /// Redirect to the given location instead.
    Redirect(String),
}

pub struct SecurityConfig {
    secret_key: SecretString,
    user_identity_attributes: Vec<String>,

    registerable: bool,
    confirmable: bool,
    recoverable: bool,
    changeable: bool,
    login_without_confirmation: bool,
    auto_login_after_register: bool,
    default_remember_me: bool,

    send_register_email: bool,
    send_password_changed_email: bool,
    send_password_reset_email: bool,
    send_password_reset_notice_email: bool,

    confirm_email_within: String,
    reset_password_within: String,
    remember_token_within: String,
    token_max_age: Option<String>,

    confirm_salt: String,
    reset_salt: String,
    remember_salt: String,
    auth_salt: String,

    password_scheme: String,
    password_schemes: Vec<String>,
    deprecated_password_schemes: Vec<String>,
    password_single_hash: bool,
    password_salt: Option<SecretString>,

    unauthorized_behavior: UnauthorizedBehavior,
    post_login_redirect: String,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: SecretString::from(secret_key.into()),
            user_identity_attributes: vec!["email".to_string()],
            registerable: false,
            confirmable: false,
            recoverable: false,
            changeable: false,
            login_without_confirmation: false,
            auto_login_after_register: true,
            default_remember_me: false,
            send_register_email: true,
            send_password_changed_email: true,
            send_password_reset_email: true,
            send_password_reset_notice_email: true,
            confirm_email_within: DEFAULT_CONFIRM_EMAIL_WITHIN.to_string(),
            reset_password_within: DEFAULT_RESET_PASSWORD_WITHIN.to_string(),
            remember_token_within: DEFAULT_REMEMBER_TOKEN_WITHIN.to_string(),
            token_max_age: None,
            confirm_salt: "confirm-salt".to_string(),
            reset_salt: "reset-salt".to_string(),
            remember_salt: "remember-salt".to_string(),
            auth_salt: "auth-salt".to_string(),
            password_scheme: "argon2".to_string(),
            password_schemes: vec![
                "argon2".to_string(),
                "pbkdf2_sha512".to_string(),
                // and always the last one...
                "plaintext".to_string(),
            ],
            deprecated_password_schemes: vec!["auto".to_string()],
            password_single_hash: false,
            password_salt: None,
            unauthorized_behavior: UnauthorizedBehavior::Abort,
            post_login_redirect: DEFAULT_POST_LOGIN_REDIRECT.to_string(),
        }
    }

    #[must_use]
    pub fn with_identity_attributes(mut self, attrs: Vec<String>) -> Self {
        self.user_identity_attributes = attrs;
        self
    }

    #[must_use]
    pub fn with_registerable(mut self, enabled: bool) -> Self {
        self.registerable = enabled;
        self
    }

    #[must_use]
    pub fn with_confirmable(mut self, enabled: bool) -> Self {
        self.confirmable = enabled;
        self
    }

    #[must_use]
    pub fn with_recoverable(mut self, enabled: bool) -> Self {
        self.recoverable = enabled;
        self
    }

    #[must_use]
    pub fn with_changeable(mut self, enabled: bool) -> Self {
        self.changeable = enabled;
        self
    }

    #[must_use]
    pub fn with_login_without_confirmation(mut self, enabled: bool) -> Self {
        self.login_without_confirmation = enabled;
        self
    }

    #[must_use]
    pub fn with_auto_login_after_register(mut self, enabled: bool) -> Self {
        self.auto_login_after_register = enabled;
        self
    }

    #[must_use]
    pub fn with_default_remember_me(mut self, enabled: bool) -> Self {
        self.default_remember_me = enabled;
        self
    }

    #[must_use]
    pub fn with_send_register_email(mut self, enabled: bool) -> Self {
        self.send_register_email = enabled;
        self
    }

    #[must_use]
    pub fn with_send_password_changed_email(mut self, enabled: bool) -> Self {
        self.send_password_changed_email = enabled;
        self
    }

    #[must_use]
    pub fn with_send_password_reset_email(mut self, enabled: bool) -> Self {
        self.send_password_reset_email = enabled;
        self
    }

    #[must_use]
    pub fn with_send_password_reset_notice_email(mut self, enabled: bool) -> Self {
        self.send_password_reset_notice_email = enabled;
        self
    }

    #[must_use]
    pub fn with_confirm_email_within(mut self, within: impl Into<String>) -> Self {
        self.confirm_email_within = within.into();
        self
    }

    #[must_use]
    pub fn with_reset_password_within(mut self, within: impl Into<String>) -> Self {
        self.reset_password_within = within.into();
        self
    }

    #[must_use]
    pub fn with_remember_token_within(mut self, within: impl Into<String>) -> Self {
        self.remember_token_within = within.into();
        self
    }

    #[must_use]
    pub fn with_token_max_age(mut self, max_age: Option<String>) -> Self {
        self.token_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_password_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.password_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn with_password_schemes(mut self, schemes: Vec<String>) -> Self {
        self.password_schemes = schemes;
        self
    }

    #[must_use]
    pub fn with_deprecated_password_schemes(mut self, schemes: Vec<String>) -> Self {
        self.deprecated_password_schemes = schemes;
        self
    }

    #[must_use]
    pub fn with_password_single_hash(mut self, enabled: bool) -> Self {
        self.password_single_hash = enabled;
        self
    }

    #[must_use]
    pub fn with_password_salt(mut self, salt: impl Into<String>) -> Self {
        self.password_salt = Some(SecretString::from(salt.into()));
        self
    }

    #[must_use]
    pub fn with_unauthorized_behavior(mut self, behavior: UnauthorizedBehavior) -> Self {
        self.unauthorized_behavior = behavior;
        self
    }

    #[must_use]
    pub fn with_post_login_redirect(mut self, location: impl Into<String>) -> Self {
        self.post_login_redirect = location.into();
        self
    }

    /// Check the configuration for deployment mistakes.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or disallowed scheme names, the
    /// single-hash/custom-salt conflict, colliding purpose salts, or
    /// unparseable token windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in &self.password_schemes {
            if Scheme::from_name(name).is_none() {
                return Err(ConfigError::UnknownScheme(name.clone()));
            }
        }
        if Scheme::from_name(&self.password_scheme).is_none() {
            return Err(ConfigError::UnknownScheme(self.password_scheme.clone()));
        }
        if !self.password_schemes.contains(&self.password_scheme) {
            return Err(ConfigError::SchemeNotAllowed(self.password_scheme.clone()));
        }
        for name in &self.deprecated_password_schemes {
            if name == "auto" {
                continue;
            }
            if Scheme::from_name(name).is_none() {
                return Err(ConfigError::UnknownScheme(name.clone()));
            }
            if !self.password_schemes.contains(name) {
                return Err(ConfigError::DeprecatedSchemeNotAllowed(name.clone()));
            }
        }

        if self.password_single_hash && self.password_salt.is_some() {
            return Err(ConfigError::SingleHashWithSalt);
        }

        let salts = [
            &self.confirm_salt,
            &self.reset_salt,
            &self.remember_salt,
            &self.auth_salt,
        ];
        for (i, salt) in salts.iter().enumerate() {
            if salts[i + 1..].contains(salt) {
                return Err(ConfigError::DuplicatePurposeSalt);
            }
        }

        MaxAge::parse(&self.confirm_email_within)?;
        MaxAge::parse(&self.reset_password_within)?;
        MaxAge::parse(&self.remember_token_within)?;
        if let Some(max_age) = &self.token_max_age {
            MaxAge::parse(max_age)?;
        }
        Ok(())
    }

    pub(crate) fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    #[must_use]
    pub fn user_identity_attributes(&self) -> &[String] {
        &self.user_identity_attributes
    }

    #[must_use]
    pub fn registerable(&self) -> bool {
        self.registerable
    }

    #[must_use]
    pub fn confirmable(&self) -> bool {
        self.confirmable
    }

    #[must_use]
    pub fn recoverable(&self) -> bool {
        self.recoverable
    }

    #[must_use]
    pub fn changeable(&self) -> bool {
        self.changeable
    }

    #[must_use]
    pub fn login_without_confirmation(&self) -> bool {
        self.login_without_confirmation
    }

    #[must_use]
    pub fn auto_login_after_register(&self) -> bool {
        self.auto_login_after_register
    }

    #[must_use]
    pub fn default_remember_me(&self) -> bool {
        self.default_remember_me
    }

    #[must_use]
    pub fn send_register_email(&self) -> bool {
        self.send_register_email
    }

    #[must_use]
    pub fn send_password_changed_email(&self) -> bool {
        self.send_password_changed_email
    }

    #[must_use]
    pub fn send_password_reset_email(&self) -> bool {
        self.send_password_reset_email
    }

    #[must_use]
    pub fn send_password_reset_notice_email(&self) -> bool {
        self.send_password_reset_notice_email
    }

    /// Validity window for a purpose, parsed from the configured human string.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured window string does not parse;
    /// [`SecurityConfig::validate`] catches this at startup.
    pub fn window_for(&self, purpose: TokenPurpose) -> Result<MaxAge, ConfigError> {
        match purpose {
            TokenPurpose::Confirm => MaxAge::parse(&self.confirm_email_within),
            TokenPurpose::Reset => MaxAge::parse(&self.reset_password_within),
            TokenPurpose::Remember => MaxAge::parse(&self.remember_token_within),
            TokenPurpose::Auth => match &self.token_max_age {
                Some(max_age) => MaxAge::parse(max_age),
                None => Ok(MaxAge::UNLIMITED),
            },
        }
    }

    #[must_use]
    pub fn salt_for(&self, purpose: TokenPurpose) -> &str {
        match purpose {
            TokenPurpose::Confirm => &self.confirm_salt,
            TokenPurpose::Reset => &self.reset_salt,
            TokenPurpose::Remember => &self.remember_salt,
            TokenPurpose::Auth => &self.auth_salt,
        }
    }

    #[must_use]
    pub fn password_scheme(&self) -> &str {
        &self.password_scheme
    }

    #[must_use]
    pub fn password_schemes(&self) -> &[String] {
        &self.password_schemes
    }

    #[must_use]
    pub fn deprecated_password_schemes(&self) -> &[String] {
        &self.deprecated_password_schemes
    }

    #[must_use]
    pub fn password_single_hash(&self) -> bool {
        self.password_single_hash
    }

    pub(crate) fn password_pepper(&self) -> &str {
        self.password_salt
            .as_ref()
            .map_or(DEFAULT_PASSWORD_SALT, |salt| salt.expose_secret())
    }

    #[must_use]
    pub fn unauthorized_behavior(&self) -> &UnauthorizedBehavior {
        &self.unauthorized_behavior
    }

    #[must_use]
    pub fn post_login_redirect(&self) -> &str {
        &self.post_login_redirect
    }
}
