//! Per-principal permission evaluation.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::errors::{AccessError, AccessResult};
use crate::permissions::Permissions;
use crate::policy::PolicySet;
use crate::resource::{Resource, ResourcePath};
use crate::store::{PolicyGrant, PolicyStore};

pub const USER_PREFIX: &str = "user/";
pub const GROUP_PREFIX: &str = "group/";

/// Anything a permission check can be asked about.
#[derive(Debug, Clone, Copy)]
pub enum ResourceTarget<'a> {
    Path(&'a ResourcePath),
    Raw(&'a str),
    Instance(&'a Resource),
}

impl<'a> From<&'a ResourcePath> for ResourceTarget<'a> {
    fn from(path: &'a ResourcePath) -> Self {
        ResourceTarget::Path(path)
    }
}

impl<'a> From<&'a str> for ResourceTarget<'a> {
    fn from(raw: &'a str) -> Self {
        ResourceTarget::Raw(raw)
    }
}

impl<'a> From<&'a String> for ResourceTarget<'a> {
    fn from(raw: &'a String) -> Self {
        ResourceTarget::Raw(raw)
    }
}

impl<'a> From<&'a Resource> for ResourceTarget<'a> {
    fn from(resource: &'a Resource) -> Self {
        ResourceTarget::Instance(resource)
    }
}

impl ResourceTarget<'_> {
    fn describe(&self) -> String {
        match self {
            ResourceTarget::Path(path) => path.to_string(),
            ResourceTarget::Raw(raw) => (*raw).to_string(),
            ResourceTarget::Instance(res) => res.path().to_string(),
        }
    }
}

/// Answers permission questions for one principal.
///
/// The principal's grants, and for users those of their groups, are loaded
/// from the store the first time a check needs them and then reused for the
/// life of the context. A failed load is returned to the caller and retried
/// on the next check.
pub struct SecurityContext {
    principal: String,
    root_principal: Option<String>,
    store: Arc<dyn PolicyStore>,
    policies: OnceCell<PolicySet>,
}

impl SecurityContext {
    pub fn new(principal: impl Into<String>, store: Arc<dyn PolicyStore>) -> Self {
        Self {
            principal: principal.into(),
            root_principal: None,
            store,
            policies: OnceCell::new(),
        }
    }

    pub fn with_root_principal(mut self, root: Option<String>) -> Self {
        self.root_principal = root;
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_root(&self) -> bool {
        self.root_principal.as_deref() == Some(self.principal.as_str())
    }

    pub async fn policies(&self) -> AccessResult<&PolicySet> {
        self.policies
            .get_or_try_init(|| async {
                let grants = self.load_grants().await.map_err(AccessError::Store)?;
                let set = PolicySet::from_grants(&grants);
                debug!(principal = %self.principal, grants = grants.len(), types = set.len(), "loaded policies");
                Ok(set)
            })
            .await
    }

    async fn load_grants(&self) -> anyhow::Result<Vec<PolicyGrant>> {
        let mut grants = self.store.find_grants(&self.principal).await?;
        if self.principal.starts_with(USER_PREFIX) {
            for group in self.store.find_group_memberships(&self.principal).await? {
                trace!(principal = %self.principal, group = %group, "merging group grants");
                grants.extend(self.store.find_grants(&group).await?);
            }
        }
        Ok(grants)
    }

    /// True when any requested bit is granted. A type with no grants at all
    /// is a denial.
    pub async fn has_permissions<'a>(
        &self,
        requested: Permissions,
        resource: impl Into<ResourceTarget<'a>>,
    ) -> AccessResult<bool> {
        if self.is_root() {
            return Ok(true);
        }
        let target = resource.into();
        let parsed;
        let (path, instance) = match target {
            ResourceTarget::Path(path) => (path, None),
            ResourceTarget::Raw(raw) => {
                parsed = ResourcePath::parse(raw)?;
                (&parsed, None)
            }
            ResourceTarget::Instance(res) => {
                parsed = res.path();
                (&parsed, Some(res))
            }
        };

        let granted = self.policies().await?.evaluate(path, instance);
        trace!(
            principal = %self.principal,
            resource = %path,
            requested = requested.bits(),
            granted = ?granted,
            "evaluated permissions"
        );
        Ok(granted.is_some_and(|bits| bits.intersects(requested)))
    }

    /// Guarded-operation form of [`has_permissions`](Self::has_permissions).
    pub async fn check_permissions<'a>(
        &self,
        requested: Permissions,
        resource: impl Into<ResourceTarget<'a>>,
    ) -> AccessResult<()> {
        let target = resource.into();
        if self.has_permissions(requested, target).await? {
            Ok(())
        } else {
            Err(AccessError::AccessDenied {
                principal: self.principal.clone(),
                resource: target.describe(),
                requested,
            })
        }
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("principal", &self.principal)
            .field("loaded", &self.policies.initialized())
            .finish()
    }
}

/// Creates security contexts that share a store and root principal.
#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn PolicyStore>,
    root_principal: Option<String>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            root_principal: None,
        }
    }

    pub fn with_root_principal(mut self, root: impl Into<String>) -> Self {
        self.root_principal = Some(root.into());
        self
    }

    pub fn root_principal(&self) -> Option<&str> {
        self.root_principal.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn context_for(&self, principal: impl Into<String>) -> SecurityContext {
        SecurityContext::new(principal, Arc::clone(&self.store))
            .with_root_principal(self.root_principal.clone())
    }

    /// A context for the root principal, if one is configured
    pub fn root_context(&self) -> Option<SecurityContext> {
        self.root_principal
            .as_ref()
            .map(|root| self.context_for(root.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPolicyStore;

    fn store() -> Arc<dyn PolicyStore> {
        Arc::new(
            InMemoryPolicyStore::new()
                .with_grant("user/u1", "doc/*", Permissions::READ)
                .with_grant("user/u1", "doc/7", Permissions::DELETE),
        )
    }

    #[tokio::test]
    async fn raw_strings_and_paths_evaluate_alike() {
        let ctx = SecurityContext::new("user/u1", store());
        let path = ResourcePath::parse("doc/7").unwrap();
        assert!(ctx.has_permissions(Permissions::DELETE, &path).await.unwrap());
        assert!(ctx.has_permissions(Permissions::DELETE, "doc/7").await.unwrap());
        assert!(!ctx.has_permissions(Permissions::DELETE, "doc/8").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_type_is_denied() {
        let ctx = SecurityContext::new("user/u1", store());
        assert!(!ctx.has_permissions(Permissions::ALL, "note/1").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_raw_path_is_reported() {
        let ctx = SecurityContext::new("user/u1", store());
        let err = ctx.has_permissions(Permissions::READ, "doc").await.unwrap_err();
        assert!(matches!(err, AccessError::MalformedResourcePath { .. }));
    }

    #[tokio::test]
    async fn check_permissions_denies_with_request_only() {
        let ctx = SecurityContext::new("user/u1", store());
        ctx.check_permissions(Permissions::READ, "doc/1").await.unwrap();
        let err = ctx
            .check_permissions(Permissions::UPDATE, "doc/1")
            .await
            .unwrap_err();
        match err {
            AccessError::AccessDenied { principal, resource, requested } => {
                assert_eq!(principal, "user/u1");
                assert_eq!(resource, "doc/1");
                assert_eq!(requested, Permissions::UPDATE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn factory_applies_root_principal() {
        let access = AccessControl::new(store()).with_root_principal("user/root");
        assert!(access.root_context().unwrap().is_root());
        assert!(!access.context_for("user/u1").is_root());
    }
}
