//! User-facing message catalog.
//!
//! Every string shown for an authentication outcome lives here so hosts can
//! audit (or localize) the full set in one place. Credential failures on
//! login coalesce into one generic message; see [`login_error_message`].

use crate::verifier::LoginOutcome;

pub const FIELD_REQUIRED: &str = "This field is required.";
pub const INVALID_EMAIL_ADDRESS: &str = "Invalid email address.";
pub const PASSWORD_INVALID_LENGTH: &str = "Password must be at least 8 characters long.";
pub const RETYPE_PASSWORD_MISMATCH: &str = "Passwords do not match.";

pub const DISABLED_ACCOUNT: &str = "Account is disabled.";
pub const CONFIRMATION_REQUIRED: &str = "Email requires confirmation.";
pub const ALREADY_CONFIRMED: &str = "Your email has already been confirmed.";
pub const EMAIL_CONFIRMED: &str = "Thank you. Your email has been confirmed.";
pub const CONFIRMATION_EXPIRED: &str =
    "You did not confirm your email within the required window.";
pub const INVALID_CONFIRMATION_TOKEN: &str = "Invalid confirmation token.";
pub const INVALID_RESET_TOKEN: &str = "Invalid reset password token.";
pub const RESET_EXPIRED: &str =
    "You did not reset your password within the required window.";
pub const PASSWORD_IS_THE_SAME: &str =
    "Your new password must be different than your previous password.";
pub const INVALID_PASSWORD: &str = "Invalid password.";
pub const EMAIL_ALREADY_ASSOCIATED: &str =
    "An account is already associated with this email.";

/// Map a login outcome to its user-facing message, or `None` on success.
///
/// Every credential failure (unknown user, no password on record, wrong
/// password, bad token) gets the same generic string built from the
/// configured identity attributes, so a response never reveals whether an
/// account exists. Account-state failures are safe to name.
#[must_use]
pub fn login_error_message(
    outcome: &LoginOutcome,
    identity_attributes: &[String],
) -> Option<String> {
    match outcome {
        LoginOutcome::Authenticated(_) => None,
        LoginOutcome::Disabled => Some(DISABLED_ACCOUNT.to_string()),
        LoginOutcome::ConfirmationRequired => Some(CONFIRMATION_REQUIRED.to_string()),
        LoginOutcome::NoSuchUser
        | LoginOutcome::NoPasswordSet
        | LoginOutcome::WrongPassword
        | LoginOutcome::InvalidToken => Some(generic_credentials_message(identity_attributes)),
    }
}

fn generic_credentials_message(identity_attributes: &[String]) -> String {
    let attributes = if identity_attributes.is_empty() {
        "identity".to_string()
    } else {
        identity_attributes.join(", ")
    };
    format!("Invalid {attributes} and/or password.")
}
