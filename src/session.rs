//! Auth session state for the current request.
//!
//! Two resolution modes share one accessor: the stateful cookie session
//! (with remember-cookie re-establishment) and stateless per-request token
//! auth, which never touches session state. Session is always consulted
//! before the token.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::store::{Principal, PrincipalId, UserStore};
use crate::token::{TokenCodec, TokenPurpose};
use crate::verifier::CredentialVerifier;

pub const SESSION_IDENTITY_KEY: &str = "identity.id";
pub const SESSION_FRESH_KEY: &str = "identity.fresh";

/// Request/session capability provided by the host framework.
pub trait RequestContext {
    fn session_get(&self, key: &str) -> Option<String>;
    fn session_set(&mut self, key: &str, value: &str);
    fn session_remove(&mut self, key: &str);

    fn remember_cookie(&self) -> Option<String>;
    fn set_remember_cookie(&mut self, token: &str);
    fn clear_remember_cookie(&mut self);

    /// Bearer/query auth token, already extracted by the host.
    fn auth_token(&self) -> Option<String>;

    /// Content-negotiation hint: machine-readable (JSON) request or browser.
    fn wants_json(&self) -> bool;

    fn flash(&mut self, message: &str, category: &str);
}

/// Downstream notification that the request's identity changed, so cached
/// access-check state can be invalidated.
pub trait IdentityWatcher {
    fn identity_changed(&self, identity: Option<PrincipalId>);
}

/// Watcher that ignores every notification.
pub struct NoopWatcher;

impl IdentityWatcher for NoopWatcher {
    fn identity_changed(&self, _identity: Option<PrincipalId>) {}
}

/// Request-scoped session projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub principal_id: Option<PrincipalId>,
    pub fresh: bool,
    pub remember: bool,
}

impl AuthSession {
    #[must_use]
    pub fn from_context(ctx: &dyn RequestContext) -> Self {
        let principal_id = ctx
            .session_get(SESSION_IDENTITY_KEY)
            .and_then(|raw| raw.parse().ok());
        Self {
            principal_id,
            fresh: ctx
                .session_get(SESSION_FRESH_KEY)
                .is_some_and(|flag| flag == "1"),
            remember: ctx.remember_cookie().is_some(),
        }
    }
}

/// How the current principal was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Session,
    Remember,
    Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAuth {
    pub principal: Principal,
    pub method: AuthMethod,
    pub fresh: bool,
}

pub struct SessionManager<'a> {
    config: &'a SecurityConfig,
    codec: &'a TokenCodec,
    users: &'a dyn UserStore,
    watcher: &'a dyn IdentityWatcher,
}

impl<'a> SessionManager<'a> {
    #[must_use]
    pub fn new(
        config: &'a SecurityConfig,
        codec: &'a TokenCodec,
        users: &'a dyn UserStore,
        watcher: &'a dyn IdentityWatcher,
    ) -> Self {
        Self {
            config,
            codec,
            users,
            watcher,
        }
    }

    /// Establish `principal` as the session identity.
    ///
    /// Returns `false` without touching the session when the principal is
    /// inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if issuing the remember token fails.
    pub fn login(
        &self,
        ctx: &mut dyn RequestContext,
        principal: &Principal,
        remember: bool,
    ) -> Result<bool> {
        self.login_with(ctx, principal, remember, false)
    }

    /// Like [`SessionManager::login`] but bypasses the active check. Used
    /// for re-authentication right after email confirmation.
    ///
    /// # Errors
    ///
    /// Returns an error if issuing the remember token fails.
    pub fn force_login(
        &self,
        ctx: &mut dyn RequestContext,
        principal: &Principal,
        remember: bool,
    ) -> Result<bool> {
        self.login_with(ctx, principal, remember, true)
    }

    fn login_with(
        &self,
        ctx: &mut dyn RequestContext,
        principal: &Principal,
        remember: bool,
        force: bool,
    ) -> Result<bool> {
        if !principal.active && !force {
            warn!(principal = principal.id, "refusing to log in inactive principal");
            return Ok(false);
        }
        ctx.session_set(SESSION_IDENTITY_KEY, &principal.id.to_string());
        ctx.session_set(SESSION_FRESH_KEY, "1");
        if remember {
            let token = self.codec.issue(
                TokenPurpose::Remember,
                &CredentialVerifier::fingerprint_payload(principal),
            )?;
            ctx.set_remember_cookie(&token);
        }
        self.watcher.identity_changed(Some(principal.id));
        debug!(principal = principal.id, remember, "session established");
        Ok(true)
    }

    /// Clear the session identity and remember cookie. Logging out an
    /// already-anonymous session is a no-op, not an error.
    pub fn logout(&self, ctx: &mut dyn RequestContext) {
        ctx.session_remove(SESSION_IDENTITY_KEY);
        ctx.session_remove(SESSION_FRESH_KEY);
        // Always clear the cookie, even if no session identity was present.
        ctx.clear_remember_cookie();
        self.watcher.identity_changed(None);
        debug!("session cleared");
    }

    /// Resolve the authenticated principal for this request: session first,
    /// then the remember cookie (re-establishing the session, not fresh),
    /// then a presented auth token (stateless, no session writes).
    ///
    /// # Errors
    ///
    /// Returns an error when the user store fails.
    pub fn authenticate_request(
        &self,
        ctx: &mut dyn RequestContext,
    ) -> Result<Option<CurrentAuth>> {
        if let Some(raw) = ctx.session_get(SESSION_IDENTITY_KEY) {
            if let Some(principal) = raw
                .parse::<PrincipalId>()
                .ok()
                .map(|id| self.users.find_by_id(id))
                .transpose()?
                .flatten()
            {
                let fresh = ctx
                    .session_get(SESSION_FRESH_KEY)
                    .is_some_and(|flag| flag == "1");
                return Ok(Some(CurrentAuth {
                    principal,
                    method: AuthMethod::Session,
                    fresh,
                }));
            }
            // Stale marker for a vanished principal; drop it.
            ctx.session_remove(SESSION_IDENTITY_KEY);
            ctx.session_remove(SESSION_FRESH_KEY);
        }

        if let Some(cookie) = ctx.remember_cookie() {
            match self.principal_from_token(&cookie, TokenPurpose::Remember)? {
                Some(principal) if principal.active => {
                    ctx.session_set(SESSION_IDENTITY_KEY, &principal.id.to_string());
                    ctx.session_set(SESSION_FRESH_KEY, "0");
                    debug!(principal = principal.id, "session restored from remember cookie");
                    return Ok(Some(CurrentAuth {
                        principal,
                        method: AuthMethod::Remember,
                        fresh: false,
                    }));
                }
                _ => {
                    ctx.clear_remember_cookie();
                }
            }
        }

        if let Some(token) = ctx.auth_token() {
            if let Some(principal) = self.principal_from_token(&token, TokenPurpose::Auth)? {
                if principal.active {
                    return Ok(Some(CurrentAuth {
                        principal,
                        method: AuthMethod::Token,
                        fresh: false,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// The one accessor both persistence modes share.
    ///
    /// # Errors
    ///
    /// Returns an error when the user store fails.
    pub fn current_principal(&self, ctx: &mut dyn RequestContext) -> Result<Option<Principal>> {
        Ok(self
            .authenticate_request(ctx)?
            .map(|current| current.principal))
    }

    fn principal_from_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<Principal>> {
        let Ok(window) = self.config.window_for(purpose) else {
            return Ok(None);
        };
        let Ok(data) = self.codec.parse(token, purpose, window) else {
            return Ok(None);
        };
        crate::verifier::principal_for_fingerprint_payload(self.users, &data.payload)
    }
}

/// In-memory request context for tests and host test suites.
#[derive(Default)]
pub struct MemoryContext {
    session: HashMap<String, String>,
    remember: Option<String>,
    auth_token: Option<String>,
    machine_readable: bool,
    flashes: Vec<(String, String)>,
}

impl MemoryContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn machine_readable(mut self, enabled: bool) -> Self {
        self.machine_readable = enabled;
        self
    }

    pub fn present_auth_token(&mut self, token: &str) {
        self.auth_token = Some(token.to_string());
    }

    #[must_use]
    pub fn flashes(&self) -> &[(String, String)] {
        &self.flashes
    }
}

impl RequestContext for MemoryContext {
    fn session_get(&self, key: &str) -> Option<String> {
        self.session.get(key).cloned()
    }

    fn session_set(&mut self, key: &str, value: &str) {
        self.session.insert(key.to_string(), value.to_string());
    }

    fn session_remove(&mut self, key: &str) {
        self.session.remove(key);
    }

    fn remember_cookie(&self) -> Option<String> {
        self.remember.clone()
    }

    fn set_remember_cookie(&mut self, token: &str) {
        self.remember = Some(token.to_string());
    }

    fn clear_remember_cookie(&mut self) {
        self.remember = None;
    }

    fn auth_token(&self) -> Option<String> {
        self.auth_token.clone()
    }

    fn wants_json(&self) -> bool {
        self.machine_readable
    }

    fn flash(&mut self, message: &str, category: &str) {
        self.flashes.push((message.to_string(), category.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::hash::HashContext;
    use crate::store::MemoryUserStore;
    use anyhow::Result;
    use std::sync::Mutex;

    /// Records every identity-changed notification.
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
        hasher: HashContext,
        codec: TokenCodec,
        users: MemoryUserStore,
        watcher: RecordingWatcher,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let config = SecurityConfig::new("k");
            let hasher = HashContext::from_config(&config)?;
            let codec = TokenCodec::from_config(&config);
            Ok(Self {
                config,
                hasher,
                codec,
                users: MemoryUserStore::new(),
                watcher: RecordingWatcher::new(),
            })
        }

        fn manager(&self) -> SessionManager<'_> {
            SessionManager::new(&self.config, &self.codec, &self.users, &self.watcher)
        }

        fn add_user(&self, email: &str, password: &str, active: bool) -> Result<Principal> {
            let hash = self.hasher.hash(password)?;
            self.users.create(email, Some(hash), active)
        }
    }

    #[test]
    fn login_establishes_session_and_notifies() -> Result<()> {
        let fixture = Fixture::new()?;
        let user = fixture.add_user("u@example.com", "password123", true)?;
        let mut ctx = MemoryContext::new();

        assert!(fixture.manager().login(&mut ctx, &user, false)?);
        let session = AuthSession::from_context(&ctx);
        assert_eq!(session.principal_id, Some(user.id));
        assert!(session.fresh);
        assert!(!session.remember);
        assert_eq!(fixture.watcher.events(), vec![Some(user.id)]);
        Ok(())
    }

    #[test]
    fn inactive_principal_cannot_log_in_without_force() -> Result<()> {
        let fixture = Fixture::new()?;
        let user = fixture.add_user("u@example.com", "password123", false)?;
        let mut ctx = MemoryContext::new();

        assert!(!fixture.manager().login(&mut ctx, &user, false)?);
        assert_eq!(AuthSession::from_context(&ctx), AuthSession::default());
        assert!(fixture.watcher.events().is_empty());

        assert!(fixture.manager().force_login(&mut ctx, &user, false)?);
        assert_eq!(
            AuthSession::from_context(&ctx).principal_id,
            Some(user.id)
        );
        Ok(())
    }

    #[test]
    fn logout_is_idempotent() -> Result<()> {
        let fixture = Fixture::new()?;
        let user = fixture.add_user("u@example.com", "password123", true)?;
        let manager = fixture.manager();
        let mut ctx = MemoryContext::new();

        manager.login(&mut ctx, &user, true)?;
        assert!(ctx.remember_cookie().is_some());

        manager.logout(&mut ctx);
        assert_eq!(AuthSession::from_context(&ctx), AuthSession::default());
        assert!(ctx.remember_cookie().is_none());

        manager.logout(&mut ctx);
        assert_eq!(AuthSession::from_context(&ctx), AuthSession::default());
        assert_eq!(
            fixture.watcher.events(),
            vec![Some(user.id), None, None]
        );
        Ok(())
    }

    #[test]
    fn remember_cookie_restores_session_not_fresh() -> Result<()> {
        let fixture = Fixture::new()?;
        let user = fixture.add_user("u@example.com", "password123", true)?;
        let manager = fixture.manager();

        let mut ctx = MemoryContext::new();
        manager.login(&mut ctx, &user, true)?;
        let cookie = ctx.remember_cookie().expect("remember cookie set");

        // A new request carrying only the cookie.
        let mut next = MemoryContext::new();
        next.set_remember_cookie(&cookie);
        let current = manager
            .authenticate_request(&mut next)?
            .expect("session restored");
        assert_eq!(current.principal.id, user.id);
        assert_eq!(current.method, AuthMethod::Remember);
        assert!(!current.fresh);
        assert_eq!(
            next.session_get(SESSION_IDENTITY_KEY),
            Some(user.id.to_string())
        );
        Ok(())
    }

    #[test]
    fn password_change_invalidates_remember_cookie() -> Result<()> {
        let fixture = Fixture::new()?;
        let mut user = fixture.add_user("u@example.com", "password123", true)?;
        let manager = fixture.manager();

        let mut ctx = MemoryContext::new();
        manager.login(&mut ctx, &user, true)?;
        let cookie = ctx.remember_cookie().expect("remember cookie set");

        user.password_hash = Some(fixture.hasher.hash("new-password-456")?);
        fixture.users.save(&user, true)?;

        let mut next = MemoryContext::new();
        next.set_remember_cookie(&cookie);
        assert!(manager.authenticate_request(&mut next)?.is_none());
        // Dead cookie is dropped so the browser stops replaying it.
        assert!(next.remember_cookie().is_none());
        Ok(())
    }

    #[test]
    fn token_auth_is_stateless() -> Result<()> {
        let fixture = Fixture::new()?;
        let user = fixture.add_user("u@example.com", "password123", true)?;
        let manager = fixture.manager();

        let token = fixture.codec.issue(
            TokenPurpose::Auth,
            &CredentialVerifier::fingerprint_payload(&user),
        )?;
        let mut ctx = MemoryContext::new().machine_readable(true);
        ctx.present_auth_token(&token);

        let current = manager
            .authenticate_request(&mut ctx)?
            .expect("token authenticates");
        assert_eq!(current.method, AuthMethod::Token);
        // No session state was written.
        assert!(ctx.session_get(SESSION_IDENTITY_KEY).is_none());
        Ok(())
    }

    #[test]
    fn session_wins_over_token() -> Result<()> {
        let fixture = Fixture::new()?;
        let alice = fixture.add_user("alice@example.com", "password123", true)?;
        let bob = fixture.add_user("bob@example.com", "password456", true)?;
        let manager = fixture.manager();

        let mut ctx = MemoryContext::new();
        manager.login(&mut ctx, &alice, false)?;
        let token = fixture.codec.issue(
            TokenPurpose::Auth,
            &CredentialVerifier::fingerprint_payload(&bob),
        )?;
        ctx.present_auth_token(&token);

        let current = manager
            .authenticate_request(&mut ctx)?
            .expect("authenticated");
        assert_eq!(current.principal.id, alice.id);
        assert_eq!(current.method, AuthMethod::Session);
        Ok(())
    }

    #[test]
    fn vanished_principal_clears_stale_session() -> Result<()> {
        let fixture = Fixture::new()?;
        let manager = fixture.manager();
        let mut ctx = MemoryContext::new();
        ctx.session_set(SESSION_IDENTITY_KEY, "999");
        ctx.session_set(SESSION_FRESH_KEY, "1");

        assert!(manager.authenticate_request(&mut ctx)?.is_none());
        assert!(ctx.session_get(SESSION_IDENTITY_KEY).is_none());
        assert!(ctx.session_get(SESSION_FRESH_KEY).is_none());
        Ok(())
    }
}
