//! Resource-based access control.
//!
//! Principals (`user/<uid>`, `group/<uid>`) hold additive permission grants
//! on resource paths. A [`SecurityContext`] loads a principal's grants once,
//! folds them into per-type [`PolicyNode`] trees and answers
//! [`has_permissions`](SecurityContext::has_permissions) queries against paths
//! or concrete [`Resource`] records.

pub mod context;
pub mod errors;
pub mod grants;
pub mod permissions;
pub mod policy;
pub mod resolver;
pub mod resource;
pub mod store;

pub use context::{AccessControl, ResourceTarget, SecurityContext, GROUP_PREFIX, USER_PREFIX};
pub use errors::{AccessError, AccessResult};
pub use grants::{assign_permission, clear_permission, policy_resource, SECURITY_POLICY_TYPE};
pub use permissions::Permissions;
pub use policy::{PolicyNode, PolicySet};
pub use resolver::{
    ChainedResourceResolver, InMemoryResourceStore, ResourceResolver, ResourceStore,
    StoreResourceResolver,
};
pub use resource::{Resource, ResourcePath, Selector, WILDCARD};
pub use store::{GrantStore, InMemoryPolicyStore, PolicyGrant, PolicyStore};
