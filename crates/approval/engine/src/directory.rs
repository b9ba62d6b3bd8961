//! Actor directory: who holds which role, who manages whom, who administers
//!
//! The engine never owns identity data. Role membership, reporting lines
//! and administrator flags are looked up through an injected
//! [`ActorDirectory`].

use approval_types::{ActorId, RoleId, TenantId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Lookups the engine needs from the identity module
pub trait ActorDirectory: Send + Sync {
    /// Every actor holding `role` in `tenant`
    fn role_members(&self, tenant: &TenantId, role: &RoleId) -> Vec<ActorId>;

    /// The manager of `actor`, if one is recorded
    fn manager_of(&self, tenant: &TenantId, actor: &ActorId) -> Option<ActorId>;

    /// Administrators may act on any step of the tenant
    fn is_admin(&self, tenant: &TenantId, actor: &ActorId) -> bool;
}

/// Directory data of one tenant
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TenantDirectory {
    #[serde(default)]
    pub roles: HashMap<RoleId, BTreeSet<ActorId>>,
    /// actor → manager
    #[serde(default)]
    pub managers: HashMap<ActorId, ActorId>,
    #[serde(default)]
    pub admins: BTreeSet<ActorId>,
}

/// In-memory directory, loadable from JSON
#[derive(Debug, Default)]
pub struct StaticDirectory {
    tenants: RwLock<HashMap<TenantId, TenantDirectory>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tenants(tenants: HashMap<TenantId, TenantDirectory>) -> Self {
        Self {
            tenants: RwLock::new(tenants),
        }
    }

    pub fn with_role(self, tenant: &str, role: &str, actors: &[&str]) -> Self {
        {
            let mut tenants = self.tenants.write();
            let members = tenants
                .entry(TenantId::new(tenant))
                .or_default()
                .roles
                .entry(RoleId::new(role))
                .or_default();
            members.extend(actors.iter().map(|a| ActorId::new(*a)));
        }
        self
    }

    pub fn with_manager(self, tenant: &str, actor: &str, manager: &str) -> Self {
        self.tenants
            .write()
            .entry(TenantId::new(tenant))
            .or_default()
            .managers
            .insert(ActorId::new(actor), ActorId::new(manager));
        self
    }

    pub fn with_admin(self, tenant: &str, actor: &str) -> Self {
        self.tenants
            .write()
            .entry(TenantId::new(tenant))
            .or_default()
            .admins
            .insert(ActorId::new(actor));
        self
    }

    /// Replace one tenant's data
    pub fn set_tenant(&self, tenant: TenantId, directory: TenantDirectory) {
        self.tenants.write().insert(tenant, directory);
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }
}

impl ActorDirectory for StaticDirectory {
    fn role_members(&self, tenant: &TenantId, role: &RoleId) -> Vec<ActorId> {
        self.tenants
            .read()
            .get(tenant)
            .and_then(|t| t.roles.get(role))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn manager_of(&self, tenant: &TenantId, actor: &ActorId) -> Option<ActorId> {
        self.tenants
            .read()
            .get(tenant)
            .and_then(|t| t.managers.get(actor))
            .cloned()
    }

    fn is_admin(&self, tenant: &TenantId, actor: &ActorId) -> bool {
        self.tenants
            .read()
            .get(tenant)
            .map(|t| t.admins.contains(actor))
            .unwrap_or(false)
    }
}
