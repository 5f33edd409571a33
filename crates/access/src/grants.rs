//! Guarded grant management.
//!
//! Changing a grant on resource `r` needs permission on the policy resource
//! `securityPolicy/[resource=r]`: `CREATE|UPDATE` to assign bits and
//! `DELETE|UPDATE` to clear them.

use common::events;
use common::topics::{TOPIC_PERMISSION, TOPIC_SECURITY_POLICY};
use serde_json::json;
use tracing::info;

use crate::context::SecurityContext;
use crate::errors::{AccessError, AccessResult};
use crate::permissions::Permissions;
use crate::resource::ResourcePath;
use crate::store::{GrantStore, PolicyGrant};

pub const SECURITY_POLICY_TYPE: &str = "securityPolicy";

/// The path guarding changes to grants on `resource`. Fails for resources
/// whose guard path would not parse back, so no such grant is ever stored.
pub fn policy_resource(resource: &str) -> AccessResult<ResourcePath> {
    ResourcePath::parse(resource)?;
    ResourcePath::for_filter(SECURITY_POLICY_TYPE, "resource", resource)
}

/// ORs `bits` into the principal's grant on `resource`, creating it if needed.
pub async fn assign_permission(
    ctx: &SecurityContext,
    store: &dyn GrantStore,
    principal: &str,
    resource: &str,
    bits: Permissions,
) -> AccessResult<PolicyGrant> {
    let guard = policy_resource(resource)?;
    ctx.check_permissions(Permissions::CREATE | Permissions::UPDATE, &guard)
        .await?;

    let existing = store
        .find_grant(principal, resource)
        .await
        .map_err(AccessError::Store)?;
    let grant = PolicyGrant::new(
        principal,
        resource,
        existing.map(|g| g.permissions).unwrap_or_default() | bits,
    );
    store
        .upsert_grant(grant.clone())
        .await
        .map_err(AccessError::Store)?;

    info!(by = %ctx.principal(), principal, resource, permissions = grant.permissions.bits(), "assigned permission");
    events::publish(
        TOPIC_SECURITY_POLICY,
        json!({ "action": "assign", "principal": principal, "resource": resource, "permissions": grant.permissions.bits() }),
    )
    .await;
    Ok(grant)
}

/// Clears `bits` from the principal's grant on `resource`; the grant is
/// deleted once no bits remain. Returns the remaining grant, if any.
pub async fn clear_permission(
    ctx: &SecurityContext,
    store: &dyn GrantStore,
    principal: &str,
    resource: &str,
    bits: Permissions,
) -> AccessResult<Option<PolicyGrant>> {
    let guard = policy_resource(resource)?;
    ctx.check_permissions(Permissions::DELETE | Permissions::UPDATE, &guard)
        .await?;

    let Some(mut grant) = store
        .find_grant(principal, resource)
        .await
        .map_err(AccessError::Store)?
    else {
        return Ok(None);
    };
    grant.permissions.remove(bits);

    let remaining = if grant.permissions.is_empty() {
        store
            .delete_grant(principal, resource)
            .await
            .map_err(AccessError::Store)?;
        None
    } else {
        store
            .upsert_grant(grant.clone())
            .await
            .map_err(AccessError::Store)?;
        Some(grant)
    };

    info!(by = %ctx.principal(), principal, resource, cleared = bits.bits(), "cleared permission");
    events::publish(
        TOPIC_PERMISSION,
        json!({
            "action": "clear",
            "principal": principal,
            "resource": resource,
            "permissions": remaining.as_ref().map(|g| g.permissions.bits()).unwrap_or(0),
        }),
    )
    .await;
    Ok(remaining)
}
