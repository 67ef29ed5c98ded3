//! Form input validation.
//!
//! Validators run in a fixed order per field and the first failure wins, so
//! error messages are deterministic. Messages live in [`crate::messages`].

use std::sync::OnceLock;

use regex::Regex;

use crate::messages;

pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 255;

/// A single failed field with its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern")
    })
}

#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    email_pattern().is_match(value)
}

fn require(field: &'static str, value: &str, errors: &mut Vec<FieldError>) -> bool {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, messages::FIELD_REQUIRED));
        return false;
    }
    true
}

fn check_email(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    if require(field, value, errors) && !is_valid_email(value) {
        errors.push(FieldError::new(field, messages::INVALID_EMAIL_ADDRESS));
    }
}

fn check_password_length(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    let length = value.chars().count();
    if length < PASSWORD_MIN_LENGTH || length > PASSWORD_MAX_LENGTH {
        errors.push(FieldError::new(field, messages::PASSWORD_INVALID_LENGTH));
    }
}

fn check_equal(
    field: &'static str,
    value: &str,
    other: &str,
    message: &str,
    errors: &mut Vec<FieldError>,
) {
    if value != other {
        errors.push(FieldError::new(field, message));
    }
}

/// Login form: identity value plus password. Presence only; credential
/// correctness belongs to [`crate::verifier`].
#[derive(Debug, Clone, Default)]
pub struct CredentialsInput {
    pub identity: String,
    pub password: String,
    pub remember: bool,
}

impl CredentialsInput {
    #[must_use]
    pub fn new(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            password: password.into(),
            remember: false,
        }
    }

    #[must_use]
    pub fn with_remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require("identity", &self.identity, &mut errors);
        require("password", &self.password, &mut errors);
        errors
    }
}

/// Registration form.
#[derive(Debug, Clone, Default)]
pub struct RegistrationInput {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

impl RegistrationInput {
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        password_confirm: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            password_confirm: password_confirm.into(),
        }
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email("email", &self.email, &mut errors);
        if require("password", &self.password, &mut errors) {
            check_password_length("password", &self.password, &mut errors);
        }
        check_equal(
            "password_confirm",
            &self.password_confirm,
            &self.password,
            messages::RETYPE_PASSWORD_MISMATCH,
            &mut errors,
        );
        errors
    }
}

/// Change-password form for an authenticated principal.
#[derive(Debug, Clone, Default)]
pub struct ChangePasswordInput {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

impl ChangePasswordInput {
    #[must_use]
    pub fn new(
        current_password: impl Into<String>,
        new_password: impl Into<String>,
        new_password_confirm: impl Into<String>,
    ) -> Self {
        Self {
            current_password: current_password.into(),
            new_password: new_password.into(),
            new_password_confirm: new_password_confirm.into(),
        }
    }

    /// Structural checks only; old-password correctness and the
    /// same-as-before rule need the stored hash and run in
    /// [`crate::service::SecurityService::change_password`].
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require("current_password", &self.current_password, &mut errors);
        if require("new_password", &self.new_password, &mut errors) {
            check_password_length("new_password", &self.new_password, &mut errors);
        }
        check_equal(
            "new_password_confirm",
            &self.new_password_confirm,
            &self.new_password,
            messages::RETYPE_PASSWORD_MISMATCH,
            &mut errors,
        );
        errors
    }
}

/// Reset-password form, paired with a reset token.
#[derive(Debug, Clone, Default)]
pub struct ResetPasswordInput {
    pub password: String,
    pub password_confirm: String,
}

impl ResetPasswordInput {
    #[must_use]
    pub fn new(password: impl Into<String>, password_confirm: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            password_confirm: password_confirm.into(),
        }
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if require("password", &self.password, &mut errors) {
            check_password_length("password", &self.password, &mut errors);
        }
        check_equal(
            "password_confirm",
            &self.password_confirm,
            &self.password,
            messages::RETYPE_PASSWORD_MISMATCH,
            &mut errors,
        );
        errors
    }
}
