//! Resolution of resource paths to concrete records.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::errors::{AccessError, AccessResult};
use crate::resource::{Resource, ResourcePath, Selector};

#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, path: &ResourcePath) -> anyhow::Result<Vec<Resource>>;
}

/// Tries resolvers in order and answers with the first non-empty result.
/// A failing resolver counts as having found nothing.
#[derive(Clone)]
pub struct ChainedResourceResolver {
    resolvers: Vec<Arc<dyn ResourceResolver>>,
}

impl std::fmt::Debug for ChainedResourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedResourceResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl ChainedResourceResolver {
    pub fn new(resolvers: Vec<Arc<dyn ResourceResolver>>) -> AccessResult<Self> {
        if resolvers.is_empty() {
            return Err(AccessError::NoResolvers);
        }
        Ok(Self { resolvers })
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub async fn resolve_str(&self, path: &str) -> AccessResult<Vec<Resource>> {
        let path = ResourcePath::parse(path)?;
        Ok(self.resolve_path(&path).await)
    }

    pub async fn resolve_path(&self, path: &ResourcePath) -> Vec<Resource> {
        for (position, resolver) in self.resolvers.iter().enumerate() {
            match resolver.resolve(path).await {
                Ok(found) if !found.is_empty() => {
                    trace!(resource = %path, position, count = found.len(), "resolved");
                    return found;
                }
                Ok(_) => {}
                Err(e) => warn!(resource = %path, position, error = %e, "resolver failed"),
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl ResourceResolver for ChainedResourceResolver {
    async fn resolve(&self, path: &ResourcePath) -> anyhow::Result<Vec<Resource>> {
        Ok(self.resolve_path(path).await)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_by_uid(&self, resource_type: &str, uid: &str) -> anyhow::Result<Option<Resource>>;

    async fn find_by_attribute(
        &self,
        resource_type: &str,
        attribute: &str,
        value: &str,
    ) -> anyhow::Result<Vec<Resource>>;

    async fn find_all(&self, resource_type: &str) -> anyhow::Result<Vec<Resource>>;
}

#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    records: RwLock<HashMap<String, Vec<Resource>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a record with the same type and uid
    pub fn insert(&self, resource: Resource) {
        let mut records = self.records.write();
        let bucket = records.entry(resource.resource_type.clone()).or_default();
        match bucket.iter_mut().find(|r| r.uid == resource.uid) {
            Some(existing) => *existing = resource,
            None => bucket.push(resource),
        }
    }

    pub fn remove(&self, resource_type: &str, uid: &str) -> Option<Resource> {
        let mut records = self.records.write();
        let bucket = records.get_mut(resource_type)?;
        let pos = bucket.iter().position(|r| r.uid == uid)?;
        Some(bucket.remove(pos))
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn find_by_uid(&self, resource_type: &str, uid: &str) -> anyhow::Result<Option<Resource>> {
        Ok(self
            .records
            .read()
            .get(resource_type)
            .and_then(|bucket| bucket.iter().find(|r| r.uid == uid).cloned()))
    }

    async fn find_by_attribute(
        &self,
        resource_type: &str,
        attribute: &str,
        value: &str,
    ) -> anyhow::Result<Vec<Resource>> {
        Ok(self
            .records
            .read()
            .get(resource_type)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|r| r.attribute_equals(attribute, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_all(&self, resource_type: &str) -> anyhow::Result<Vec<Resource>> {
        Ok(self
            .records
            .read()
            .get(resource_type)
            .cloned()
            .unwrap_or_default())
    }
}

/// Answers paths from a [`ResourceStore`]; a wildcard yields every record of the type.
#[derive(Clone)]
pub struct StoreResourceResolver {
    store: Arc<dyn ResourceStore>,
}

impl StoreResourceResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceResolver for StoreResourceResolver {
    async fn resolve(&self, path: &ResourcePath) -> anyhow::Result<Vec<Resource>> {
        let resource_type = path.resource_type();
        match path.selector() {
            Selector::Wildcard => self.store.find_all(resource_type).await,
            Selector::Uid(uid) => Ok(self
                .store
                .find_by_uid(resource_type, uid)
                .await?
                .into_iter()
                .collect()),
            Selector::Filter { attribute, value } => {
                self.store
                    .find_by_attribute(resource_type, attribute, value)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Arc<InMemoryResourceStore> {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(Resource::new("doc", "1").with_attribute("ownerUid", "u1"));
        store.insert(Resource::new("doc", "2").with_attribute("ownerUid", "u2"));
        store.insert(Resource::new("doc", "3").with_attribute("ownerUid", "u1"));
        store
    }

    #[tokio::test]
    async fn store_resolver_handles_each_selector() {
        let resolver = StoreResourceResolver::new(seeded());
        let by_uid = resolver.resolve(&"doc/2".parse().unwrap()).await.unwrap();
        assert_eq!(by_uid.len(), 1);
        assert_eq!(by_uid[0].uid, "2");

        let owned = resolver.resolve(&"doc/[ownerUid=u1]".parse().unwrap()).await.unwrap();
        assert_eq!(owned.iter().map(|r| r.uid.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);

        assert_eq!(resolver.resolve(&"doc/*".parse().unwrap()).await.unwrap().len(), 3);
        assert!(resolver.resolve(&"doc/9".parse().unwrap()).await.unwrap().is_empty());
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert!(matches!(ChainedResourceResolver::new(Vec::new()), Err(AccessError::NoResolvers)));
    }

    #[tokio::test]
    async fn insert_replaces_and_remove_deletes() {
        let store = seeded();
        store.insert(Resource::new("doc", "1").with_attribute("ownerUid", "u9"));
        assert_eq!(store.find_by_attribute("doc", "ownerUid", "u9").await.unwrap().len(), 1);
        assert!(store.remove("doc", "1").is_some());
        assert!(store.remove("doc", "1").is_none());
        assert_eq!(store.find_all("doc").await.unwrap().len(), 2);
    }
}
