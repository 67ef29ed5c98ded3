//! Access decision layer.
//!
//! Guards are plain values evaluated by one dispatch function before the
//! protected handler runs, replacing decorator stacking with an ordered
//! predicate list. Anonymity-required guards abort before any
//! authentication guard is consulted.

use anyhow::Result;

use crate::config::{SecurityConfig, UnauthorizedBehavior};
use crate::error::AccessDenied;
use crate::session::{RequestContext, SessionManager};
use crate::store::{Principal, PrincipalId};

/// A composable access guard.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    required_roles: Vec<String>,
    one_of_roles: Vec<String>,
    require_anonymous: bool,
    same_identity: Option<PrincipalId>,
    flash: Option<(String, String)>,
}

impl Guard {
    /// Require an authenticated principal, optionally constrained by roles.
    #[must_use]
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Require that no principal is authenticated.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            require_anonymous: true,
            ..Self::default()
        }
    }

    /// Require ALL of these roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Require at least one of these roles (ignored when empty).
    #[must_use]
    pub fn with_one_of<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Require the authenticated principal to own the resource.
    #[must_use]
    pub fn with_same_identity(mut self, owner: PrincipalId) -> Self {
        self.same_identity = Some(owner);
        self
    }

    /// Flash message emitted when an anonymous-only page redirects an
    /// already-authenticated browser.
    #[must_use]
    pub fn with_flash(mut self, message: impl Into<String>, category: impl Into<String>) -> Self {
        self.flash = Some((message.into(), category.into()));
        self
    }

    /// Constraint check against an already-resolved principal. Anonymity is
    /// handled by the dispatch function, not here.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when no principal was resolved, `Forbidden` when the
    /// principal fails a role or identity constraint.
    pub fn check(&self, principal: Option<&Principal>) -> Result<(), AccessDenied> {
        let Some(principal) = principal else {
            return Err(AccessDenied::Unauthorized);
        };
        if let Some(owner) = self.same_identity {
            if principal.id != owner {
                return Err(AccessDenied::Forbidden);
            }
        }
        let roles = principal.role_names();
        if !self
            .required_roles
            .iter()
            .all(|role| roles.contains(role.as_str()))
        {
            return Err(AccessDenied::Forbidden);
        }
        if !self.one_of_roles.is_empty()
            && !self
                .one_of_roles
                .iter()
                .any(|role| roles.contains(role.as_str()))
        {
            return Err(AccessDenied::Forbidden);
        }
        Ok(())
    }
}

/// Result of dispatching a guard chain.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    /// Request may proceed; carries the resolved principal, if any.
    Allow(Option<Principal>),
    Deny(AccessDenied),
    /// Browser requests get redirected instead of a bare status.
    Redirect(String),
}

/// Evaluate `guards` in order for the current request.
///
/// Anonymity-required guards run first and short-circuit; then the principal
/// is resolved once (session before token) and every authentication guard is
/// checked against it.
///
/// # Errors
///
/// Returns an error when the user store fails.
pub fn enforce(
    guards: &[Guard],
    config: &SecurityConfig,
    sessions: &SessionManager<'_>,
    ctx: &mut dyn RequestContext,
) -> Result<GuardVerdict> {
    let principal = sessions
        .authenticate_request(ctx)?
        .map(|current| current.principal);

    for guard in guards.iter().filter(|guard| guard.require_anonymous) {
        if principal.is_some() {
            if ctx.wants_json() {
                return Ok(GuardVerdict::Deny(AccessDenied::Forbidden));
            }
            if let Some((message, category)) = &guard.flash {
                ctx.flash(message, category);
            }
            return Ok(GuardVerdict::Redirect(
                config.post_login_redirect().to_string(),
            ));
        }
    }

    for guard in guards.iter().filter(|guard| !guard.require_anonymous) {
        if let Err(denied) = guard.check(principal.as_ref()) {
            if denied == AccessDenied::Unauthorized && !ctx.wants_json() {
                if let UnauthorizedBehavior::Redirect(location) = config.unauthorized_behavior() {
                    return Ok(GuardVerdict::Redirect(location.clone()));
                }
            }
            return Ok(GuardVerdict::Deny(denied));
        }
    }

    Ok(GuardVerdict::Allow(principal))
}
