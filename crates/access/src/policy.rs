//! Per-type permission trees.
//!
//! Each resource type gets one root node for `type/*`. Grants on the wildcard
//! land on the root; every other selector becomes a child, found by its
//! literal path string.

use std::collections::HashMap;
use tracing::warn;

use crate::permissions::Permissions;
use crate::resource::{Resource, ResourcePath, Selector};
use crate::store::PolicyGrant;

#[derive(Debug, Clone)]
pub struct PolicyNode {
    resource_path: ResourcePath,
    permissions: Permissions,
    children: Vec<PolicyNode>,
    index: HashMap<String, usize>,
}

impl PolicyNode {
    pub fn new(resource_path: ResourcePath) -> Self {
        Self {
            resource_path,
            permissions: Permissions::empty(),
            children: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Synthetic `type/*` root for a resource type
    pub fn root(resource_type: &str) -> Self {
        Self::new(ResourcePath::wildcard(resource_type))
    }

    pub fn resource_path(&self) -> &ResourcePath {
        &self.resource_path
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn children(&self) -> &[PolicyNode] {
        &self.children
    }

    pub fn accept(&mut self, path: &ResourcePath, bits: Permissions) {
        if path.is_wildcard() {
            self.permissions |= bits;
            return;
        }
        let slot = match self.index.get(path.path()) {
            Some(&slot) => slot,
            None => {
                self.children.push(PolicyNode::new(path.clone()));
                let slot = self.children.len() - 1;
                self.index.insert(path.path().to_string(), slot);
                slot
            }
        };
        self.children[slot].permissions |= bits;
    }

    /// A filter node matches an instance whose attribute equals the filter
    /// value, or a candidate path carrying the very same filter.
    pub fn matches(&self, candidate: &ResourcePath, instance: Option<&Resource>) -> bool {
        if self.resource_path.resource_type() != candidate.resource_type() {
            return false;
        }
        match self.resource_path.selector() {
            Selector::Wildcard => true,
            Selector::Uid(uid) => candidate.uid() == Some(uid.as_str()),
            Selector::Filter { attribute, value } => {
                candidate.filter() == Some((attribute.as_str(), value.as_str()))
                    || instance.is_some_and(|res| res.attribute_equals(attribute, value))
            }
        }
    }

    /// Own bits plus those of every matching child
    pub fn evaluate(&self, candidate: &ResourcePath, instance: Option<&Resource>) -> Permissions {
        self.children
            .iter()
            .filter(|child| child.matches(candidate, instance))
            .fold(self.permissions, |acc, child| acc | child.permissions)
    }
}

/// The policy roots for one principal, one per resource type.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    roots: HashMap<String, PolicyNode>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants whose resource does not parse are skipped with a warning.
    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a PolicyGrant>) -> Self {
        let mut set = Self::new();
        for grant in grants {
            match ResourcePath::parse(&grant.resource) {
                Ok(path) => set.accept(&path, grant.permissions),
                Err(e) => warn!(
                    principal = %grant.principal,
                    resource = %grant.resource,
                    error = %e,
                    "skipping grant with malformed resource"
                ),
            }
        }
        set
    }

    pub fn accept(&mut self, path: &ResourcePath, bits: Permissions) {
        self.roots
            .entry(path.resource_type().to_string())
            .or_insert_with(|| PolicyNode::root(path.resource_type()))
            .accept(path, bits);
    }

    pub fn root(&self, resource_type: &str) -> Option<&PolicyNode> {
        self.roots.get(resource_type)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// `None` when no grant mentions the candidate's type at all
    pub fn evaluate(&self, candidate: &ResourcePath, instance: Option<&Resource>) -> Option<Permissions> {
        self.root(candidate.resource_type())
            .map(|root| root.evaluate(candidate, instance))
    }
}
