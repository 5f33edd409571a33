use access::{
    AccessControl, ChainedResourceResolver, InMemoryPolicyStore, PolicyGrant, PolicyStore,
    Permissions, Resource, ResourcePath, ResourceResolver, SecurityContext,
};
use anyhow::Result;
use async_trait::async_trait;
use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a store and counts how often grants are read.
struct CountingStore {
    inner: InMemoryPolicyStore,
    grant_reads: AtomicUsize,
}

#[async_trait]
impl PolicyStore for CountingStore {
    async fn find_grants(&self, principal: &str) -> Result<Vec<PolicyGrant>> {
        self.grant_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_grants(principal).await
    }

    async fn find_group_memberships(&self, user: &str) -> Result<Vec<String>> {
        self.inner.find_group_memberships(user).await
    }
}

struct FailingStore;

#[async_trait]
impl PolicyStore for FailingStore {
    async fn find_grants(&self, _principal: &str) -> Result<Vec<PolicyGrant>> {
        anyhow::bail!("database unavailable")
    }

    async fn find_group_memberships(&self, _user: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[fixture]
fn access_control() -> AccessControl {
    let store = InMemoryPolicyStore::new()
        .with_grant("user/reader", "doc/*", Permissions::READ)
        .with_grant("user/owner", "doc/[ownerUid=u1]", Permissions::ALL)
        .with_grant("group/staff", "doc/*", Permissions::READ)
        .with_membership("user/member", "group/staff");
    AccessControl::new(Arc::new(store)).with_root_principal("user/root")
}

#[rstest]
#[case("doc/123")]
#[case("doc/anything-else")]
#[case("doc/*")]
#[tokio::test]
async fn test_wildcard_grant_covers_every_uid(access_control: AccessControl, #[case] resource: &str) -> Result<()> {
    let ctx = access_control.context_for("user/reader");

    assert!(ctx.has_permissions(Permissions::READ, resource).await?);
    assert!(!ctx.has_permissions(Permissions::UPDATE, resource).await?);
    assert!(!ctx.has_permissions(Permissions::CREATE | Permissions::DELETE, resource).await?);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_attribute_filter_applies_to_instances(access_control: AccessControl) -> Result<()> {
    let ctx = access_control.context_for("user/owner");
    let mine = Resource::new("doc", "42").with_attribute("ownerUid", "u1");
    let theirs = Resource::new("doc", "42").with_attribute("ownerUid", "u2");

    assert!(ctx.has_permissions(Permissions::DELETE, &mine).await?);
    assert!(!ctx.has_permissions(Permissions::READ, &theirs).await?);
    // A bare path carries no attributes to test the filter against
    assert!(!ctx.has_permissions(Permissions::READ, "doc/42").await?);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_group_grants_are_inherited(access_control: AccessControl) -> Result<()> {
    let member = access_control.context_for("user/member");
    assert!(member.has_permissions(Permissions::READ, "doc/x").await?);
    assert!(!member.has_permissions(Permissions::UPDATE, "doc/x").await?);

    let outsider = access_control.context_for("user/outsider");
    assert!(!outsider.has_permissions(Permissions::READ, "doc/x").await?);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_groups_do_not_inherit_from_groups() -> Result<()> {
    let store = InMemoryPolicyStore::new()
        .with_grant("group/parent", "doc/*", Permissions::READ)
        .with_membership("group/child", "group/parent");
    let ctx = SecurityContext::new("group/child", Arc::new(store));

    assert!(!ctx.has_permissions(Permissions::READ, "doc/1").await?);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_root_principal_bypasses_policy(access_control: AccessControl) -> Result<()> {
    let root = access_control.context_for("user/root");
    assert!(root.has_permissions(Permissions::ALL, "anything/at-all").await?);
    assert!(root.has_permissions(Permissions::EXECUTE, &Resource::new("job", "1")).await?);
    assert!(root.check_permissions(Permissions::DELETE, "securityPolicy/*").await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_root_bypass_never_touches_store() -> Result<()> {
    let store = Arc::new(CountingStore {
        inner: InMemoryPolicyStore::new(),
        grant_reads: AtomicUsize::new(0),
    });
    let access_control = AccessControl::new(store.clone()).with_root_principal("user/root");

    access_control.context_for("user/root").has_permissions(Permissions::READ, "doc/1").await?;
    assert_eq!(store.grant_reads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_policies_load_once_per_context() -> Result<()> {
    let store = Arc::new(CountingStore {
        inner: InMemoryPolicyStore::new()
            .with_grant("group/staff", "doc/*", Permissions::READ)
            .with_membership("user/member", "group/staff"),
        grant_reads: AtomicUsize::new(0),
    });
    let ctx = Arc::new(SecurityContext::new("user/member", store.clone()));

    let checks: Vec<_> = (0..8)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.has_permissions(Permissions::READ, format!("doc/{i}").as_str()).await })
        })
        .collect();
    for check in checks {
        assert!(check.await??);
    }

    // One read for the user, one for its single group
    assert_eq!(store.grant_reads.load(Ordering::SeqCst), 2);

    let fresh = SecurityContext::new("user/member", store.clone());
    fresh.has_permissions(Permissions::READ, "doc/1").await?;
    assert_eq!(store.grant_reads.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn test_store_failure_is_reported_not_denied() {
    let ctx = SecurityContext::new("user/u1", Arc::new(FailingStore));
    let err = ctx.has_permissions(Permissions::READ, "doc/1").await.unwrap_err();
    assert_eq!(err.error_code(), "POLICY_STORE_ERROR");
    assert_eq!(err.status_code(), 500);
}

struct FixedResolver(Vec<Resource>);

#[async_trait]
impl ResourceResolver for FixedResolver {
    async fn resolve(&self, _path: &ResourcePath) -> Result<Vec<Resource>> {
        Ok(self.0.clone())
    }
}

struct BrokenResolver;

#[async_trait]
impl ResourceResolver for BrokenResolver {
    async fn resolve(&self, _path: &ResourcePath) -> Result<Vec<Resource>> {
        anyhow::bail!("lookup exploded")
    }
}

#[tokio::test]
async fn test_resolver_chain_returns_first_non_empty_result() -> Result<()> {
    let chain = ChainedResourceResolver::new(vec![
        Arc::new(FixedResolver(vec![Resource::new("doc", "first")])),
        Arc::new(FixedResolver(vec![Resource::new("doc", "second")])),
    ])?;

    let found = chain.resolve_str("doc/1").await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].uid, "first");
    Ok(())
}

#[tokio::test]
async fn test_resolver_chain_skips_empty_and_failing_resolvers() -> Result<()> {
    let chain = ChainedResourceResolver::new(vec![
        Arc::new(BrokenResolver),
        Arc::new(FixedResolver(Vec::new())),
        Arc::new(FixedResolver(vec![Resource::new("doc", "fallback")])),
    ])?;

    let found = chain.resolve_str("doc/1").await?;
    assert_eq!(found[0].uid, "fallback");

    let only_broken = ChainedResourceResolver::new(vec![Arc::new(BrokenResolver)])?;
    assert!(only_broken.resolve_str("doc/1").await?.is_empty());
    assert!(only_broken.resolve_str("doc").await.is_err());
    Ok(())
}
