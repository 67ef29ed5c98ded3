//! Framework-agnostic authentication and authorization core.
//!
//! The crate owns credential hashing with scheme migration, purpose-bound
//! signed tokens, login verification, session state, and role-based access
//! guards. Persistence, mail delivery, and the HTTP surface stay with the
//! host application behind the [`store::UserStore`], [`mail::MailSender`],
//! and [`session::RequestContext`] traits.
//!
//! Most hosts construct one [`SecurityConfig`], one [`SecurityService`],
//! and drive everything through the service and [`guard::enforce`].

pub mod config;
pub mod error;
pub mod guard;
pub mod hash;
pub mod input;
pub mod mail;
pub mod messages;
pub mod service;
pub mod session;
pub mod store;
pub mod token;
pub mod verifier;

pub use config::{SecurityConfig, UnauthorizedBehavior};
pub use error::{AccessDenied, ConfigError, TokenError};
pub use guard::{Guard, GuardVerdict, enforce};
pub use hash::{HashContext, Scheme};
pub use input::{
    ChangePasswordInput, CredentialsInput, FieldError, RegistrationInput, ResetPasswordInput,
};
pub use mail::{MailMessage, MailSender};
pub use service::SecurityService;
pub use session::{
    AuthMethod, AuthSession, CurrentAuth, IdentityWatcher, RequestContext, SessionManager,
};
pub use store::{LookupKey, Principal, PrincipalId, Role, RoleStore, UserStore};
pub use token::{MaxAge, TokenCodec, TokenPurpose};
pub use verifier::{CredentialVerifier, LoginOutcome};
