use access::{
    assign_permission, clear_permission, AccessControl, AccessError, GrantStore, Permissions,
    GROUP_PREFIX, USER_PREFIX,
};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::endpoint::{handler, EndpointRegistration, HttpMethod, Request, Response};
use crate::service::{Extension, Service, ServiceExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionAction {
    Create,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PermissionBits {
    Bits(u8),
    Names(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionUpdate {
    pub action: PermissionAction,
    pub resource: String,
    permissions: PermissionBits,
}

impl PermissionUpdate {
    pub fn permissions(&self) -> Option<Permissions> {
        match &self.permissions {
            PermissionBits::Bits(bits) => Some(Permissions::from_bits_truncate(*bits)),
            PermissionBits::Names(names) => Permissions::parse(names),
        }
    }
}

/// Grant management over HTTP, plus the admin group bootstrap on start.
///
/// `PUT /users/:userUid/permissions` takes a JSON array of
/// `{action: "CREATE" | "DELETE", resource, permissions}` updates applied
/// with the caller's own permissions.
pub struct PermissionsService {
    access: AccessControl,
    grants: Arc<dyn GrantStore>,
    admin_group_uid: Option<String>,
}

impl PermissionsService {
    pub fn new(access: AccessControl, grants: Arc<dyn GrantStore>) -> Self {
        Self {
            access,
            grants,
            admin_group_uid: None,
        }
    }

    pub fn with_admin_group(mut self, group_uid: Option<String>) -> Self {
        self.admin_group_uid = group_uid;
        self
    }
}

fn user_principal(uid: &str) -> String {
    if uid.starts_with(USER_PREFIX) {
        uid.to_string()
    } else {
        format!("{USER_PREFIX}{uid}")
    }
}

async fn apply_updates(
    access: &AccessControl,
    grants: &dyn GrantStore,
    request: Request,
) -> anyhow::Result<Response> {
    let caller = request.principal.clone().context("request is not authenticated")?;
    let Some(user_uid) = request.param("userUid") else {
        return Ok(Response::error(400, "Missing userUid"));
    };
    let principal = user_principal(user_uid);
    let updates: Vec<PermissionUpdate> = match serde_json::from_value(request.body.clone()) {
        Ok(updates) => updates,
        Err(e) => return Ok(Response::error(400, format!("Invalid permission updates: {e}"))),
    };

    let ctx = access.context_for(caller);
    for update in &updates {
        let Some(bits) = update.permissions() else {
            return Ok(Response::error(400, format!("Invalid permissions for {}", update.resource)));
        };
        let result = match update.action {
            PermissionAction::Create => assign_permission(&ctx, grants, &principal, &update.resource, bits)
                .await
                .map(|_| ()),
            PermissionAction::Delete => clear_permission(&ctx, grants, &principal, &update.resource, bits)
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => {}
            Err(e @ AccessError::MalformedResourcePath { .. }) => return Ok(Response::error(400, e.to_string())),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Response::no_content())
}

/// Grants `group/<uid>` ALL on users, groups and security policies, acting
/// as the root principal.
async fn bootstrap_admin_group(access: &AccessControl, grants: &dyn GrantStore, group_uid: &str) -> anyhow::Result<()> {
    let Some(root) = access.root_context() else {
        return Ok(());
    };
    let principal = format!("{GROUP_PREFIX}{group_uid}");
    for resource in ["user/*", "group/*", "securityPolicy/*"] {
        assign_permission(&root, grants, &principal, resource, Permissions::ALL).await?;
    }
    info!(group = %principal, "granted admin group full access");
    Ok(())
}

#[async_trait]
impl Extension for PermissionsService {
    async fn init(&self, service: &dyn Service, _options: &Value) -> anyhow::Result<Vec<String>> {
        let access = self.access.clone();
        let grants = Arc::clone(&self.grants);
        service.use_endpoint(EndpointRegistration::new(
            HttpMethod::Put,
            "/users/:userUid/permissions",
            handler(move |req: Request| {
                let access = access.clone();
                let grants = Arc::clone(&grants);
                async move { apply_updates(&access, grants.as_ref(), req).await }
            }),
        ));

        let access = self.access.clone();
        let grants = Arc::clone(&self.grants);
        let admin_group = self.admin_group_uid.clone();
        service.on_started(move || {
            let access = access.clone();
            let grants = Arc::clone(&grants);
            let admin_group = admin_group.clone();
            async move {
                match admin_group {
                    Some(group) => bootstrap_admin_group(&access, grants.as_ref(), &group).await,
                    None => Ok(()),
                }
            }
        });

        if self.access.root_principal().is_none() {
            warn!("no root user configured, admin group bootstrap disabled");
        }
        Ok(Vec::new())
    }
}
