//! User and role store collaborator interfaces.
//!
//! Persistence belongs to the host application; the core only needs lookup,
//! create, and save. [`MemoryUserStore`] is a reference implementation used
//! by the crate's own tests and handy for host test suites.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Mutex;

pub type PrincipalId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    /// Unique, stable identifier. Access checks and tokens reference roles
    /// by name, so names are never renamed silently.
    pub name: String,
}

/// The authenticated identity projection the core works with.
///
/// Owned by the user store; the core holds a transient copy for the duration
/// of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    /// `None` for accounts with no usable credential (e.g. social-only).
    pub password_hash: Option<String>,
    pub active: bool,
    /// Unix seconds; `None` until the email is confirmed.
    pub confirmed_at: Option<i64>,
    pub roles: Vec<Role>,
}

impl Principal {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    /// Role-name set computed once per authenticated request for access
    /// checks.
    #[must_use]
    pub fn role_names(&self) -> HashSet<&str> {
        self.roles.iter().map(|role| role.name.as_str()).collect()
    }
}

/// How to resolve a principal. Explicit on purpose: the original system
/// guessed "numeric means id" from the lookup value, which misfires on
/// numeric-looking identity values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    Id(PrincipalId),
    /// An identity-attribute value, e.g. an email address.
    Identity(String),
}

pub trait UserStore {
    /// Look up by a single identity attribute (e.g. `"email"`).
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying store fails.
    fn find_by_identity(&self, attribute: &str, value: &str) -> Result<Option<Principal>>;

    /// # Errors
    ///
    /// Returns an error when the underlying store fails.
    fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>>;

    /// Create a principal and assign its id.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying store fails.
    fn create(
        &self,
        email: &str,
        password_hash: Option<String>,
        active: bool,
    ) -> Result<Principal>;

    /// Persist a modified principal. `commit` requests an immediate durable
    /// write where the store distinguishes the two.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying store fails.
    fn save(&self, principal: &Principal, commit: bool) -> Result<()>;
}

pub trait RoleStore {
    /// # Errors
    ///
    /// Returns an error when the underlying store fails.
    fn find_by_name(&self, name: &str) -> Result<Option<Role>>;
}

/// Resolve a lookup key against the store, trying each configured identity
/// attribute in order for [`LookupKey::Identity`].
///
/// # Errors
///
/// Returns an error when the underlying store fails.
pub fn resolve(
    store: &dyn UserStore,
    identity_attributes: &[String],
    key: &LookupKey,
) -> Result<Option<Principal>> {
    match key {
        LookupKey::Id(id) => store.find_by_id(*id),
        LookupKey::Identity(value) => {
            for attribute in identity_attributes {
                if let Some(principal) = store.find_by_identity(attribute, value)? {
                    return Ok(Some(principal));
                }
            }
            Ok(None)
        }
    }
}

/// In-memory user store. Only the `"email"` identity attribute is indexed.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: Vec<Principal>,
    next_id: PrincipalId,
    saves: usize,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a principal with an explicit id; panics (tests only) if the id
    /// is taken.
    pub fn seed(&self, principal: Principal) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        assert!(
            inner.users.iter().all(|user| user.id != principal.id),
            "duplicate principal id {}",
            principal.id
        );
        inner.next_id = inner.next_id.max(principal.id);
        inner.users.push(principal);
    }

    /// Number of times `save` has been called, for persistence assertions.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").saves
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_identity(&self, attribute: &str, value: &str) -> Result<Option<Principal>> {
        if attribute != "email" {
            return Ok(None);
        }
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.users.iter().find(|user| user.email == value).cloned())
    }

    fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.users.iter().find(|user| user.id == id).cloned())
    }

    fn create(
        &self,
        email: &str,
        password_hash: Option<String>,
        active: bool,
    ) -> Result<Principal> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_id += 1;
        let principal = Principal {
            id: inner.next_id,
            email: email.to_string(),
            password_hash,
            active,
            confirmed_at: None,
            roles: Vec::new(),
        };
        inner.users.push(principal.clone());
        Ok(principal)
    }

    fn save(&self, principal: &Principal, _commit: bool) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.saves += 1;
        if let Some(existing) = inner
            .users
            .iter_mut()
            .find(|user| user.id == principal.id)
        {
            *existing = principal.clone();
        } else {
            inner.users.push(principal.clone());
        }
        Ok(())
    }
}

/// In-memory role store keyed by name.
#[derive(Default)]
pub struct MemoryRoleStore {
    roles: Mutex<Vec<Role>>,
}

impl MemoryRoleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, role: Role) {
        self.roles.lock().expect("store lock poisoned").push(role);
    }
}

impl RoleStore for MemoryRoleStore {
    fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let roles = self.roles.lock().expect("store lock poisoned");
        Ok(roles.iter().find(|role| role.name == name).cloned())
    }
}
