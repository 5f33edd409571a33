//! Policy persistence seams and an in-memory implementation.

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::permissions::Permissions;

/// A stored (principal, resource path, permission bits) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyGrant {
    pub principal: String,
    pub resource: String,
    pub permissions: Permissions,
}

impl PolicyGrant {
    pub fn new(principal: impl Into<String>, resource: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            principal: principal.into(),
            resource: resource.into(),
            permissions,
        }
    }
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn find_grants(&self, principal: &str) -> anyhow::Result<Vec<PolicyGrant>>;

    /// Group principals (`group/<uid>`) the user principal belongs to
    async fn find_group_memberships(&self, user: &str) -> anyhow::Result<Vec<String>>;
}

/// Write access to grants, used by grant management.
#[async_trait]
pub trait GrantStore: PolicyStore {
    async fn find_grant(&self, principal: &str, resource: &str) -> anyhow::Result<Option<PolicyGrant>>;

    /// Replaces any grant for the same principal and resource.
    async fn upsert_grant(&self, grant: PolicyGrant) -> anyhow::Result<()>;

    async fn delete_grant(&self, principal: &str, resource: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    grants: RwLock<Vec<PolicyGrant>>,
    memberships: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(self, principal: &str, resource: &str, permissions: Permissions) -> Self {
        self.grants
            .write()
            .push(PolicyGrant::new(principal, resource, permissions));
        self
    }

    pub fn with_membership(self, user: &str, group: &str) -> Self {
        self.add_membership(user, group);
        self
    }

    pub fn add_membership(&self, user: &str, group: &str) {
        let mut memberships = self.memberships.write();
        let groups = memberships.entry(user.to_string()).or_default();
        if !groups.iter().any(|g| g == group) {
            groups.push(group.to_string());
        }
    }

    pub fn grants(&self) -> Vec<PolicyGrant> {
        self.grants.read().clone()
    }

    /// Loads grants and memberships from a TOML policy file:
    ///
    /// ```toml
    /// [[grants]]
    /// principal = "group/editors"
    /// resource = "doc/*"
    /// permissions = "READ|UPDATE"
    ///
    /// [memberships]
    /// "user/alice" = ["group/editors"]
    /// ```
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: PolicyFile = toml::from_str(content).context("invalid policy file")?;
        let store = Self::new();
        {
            let mut grants = store.grants.write();
            for entry in file.grants {
                let permissions = entry
                    .permissions
                    .resolve()
                    .with_context(|| format!("invalid permissions for {} on {}", entry.principal, entry.resource))?;
                grants.push(PolicyGrant::new(entry.principal, entry.resource, permissions));
            }
        }
        for (user, groups) in file.memberships {
            for group in groups {
                store.add_membership(&user, &group);
            }
        }
        Ok(store)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let store = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), grants = store.grants.read().len(), "loaded policy file");
        Ok(store)
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    grants: Vec<GrantEntry>,
    #[serde(default)]
    memberships: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GrantEntry {
    principal: String,
    resource: String,
    permissions: PermissionSpec,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PermissionSpec {
    Bits(u8),
    Names(String),
}

impl PermissionSpec {
    fn resolve(&self) -> anyhow::Result<Permissions> {
        match self {
            PermissionSpec::Bits(bits) => Ok(Permissions::from_bits_truncate(*bits)),
            PermissionSpec::Names(names) => Permissions::parse(names)
                .ok_or_else(|| anyhow::anyhow!("unknown permission name in {names:?}")),
        }
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn find_grants(&self, principal: &str) -> anyhow::Result<Vec<PolicyGrant>> {
        Ok(self
            .grants
            .read()
            .iter()
            .filter(|g| g.principal == principal)
            .cloned()
            .collect())
    }

    async fn find_group_memberships(&self, user: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.memberships.read().get(user).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl GrantStore for InMemoryPolicyStore {
    async fn find_grant(&self, principal: &str, resource: &str) -> anyhow::Result<Option<PolicyGrant>> {
        Ok(self
            .grants
            .read()
            .iter()
            .find(|g| g.principal == principal && g.resource == resource)
            .cloned())
    }

    async fn upsert_grant(&self, grant: PolicyGrant) -> anyhow::Result<()> {
        let mut grants = self.grants.write();
        match grants
            .iter_mut()
            .find(|g| g.principal == grant.principal && g.resource == grant.resource)
        {
            Some(existing) => existing.permissions = grant.permissions,
            None => grants.push(grant),
        }
        Ok(())
    }

    async fn delete_grant(&self, principal: &str, resource: &str) -> anyhow::Result<bool> {
        let mut grants = self.grants.write();
        let before = grants.len();
        grants.retain(|g| !(g.principal == principal && g.resource == resource));
        Ok(grants.len() != before)
    }
}
