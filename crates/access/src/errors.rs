use thiserror::Error;

use crate::permissions::Permissions;

/// Errors raised by the access-control engine
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Invalid resource path: {path}")]
    MalformedResourcePath { path: String },

    /// Carries only what the caller asked for; never the policy tree.
    #[error("{principal} does not have permission(0x{:x}) to access resource {resource}", .requested.bits())]
    AccessDenied {
        principal: String,
        resource: String,
        requested: Permissions,
    },

    #[error("No resource resolvers provided")]
    NoResolvers,

    #[error("Policy store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl AccessError {
    pub fn malformed(path: impl Into<String>) -> Self {
        AccessError::MalformedResourcePath { path: path.into() }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AccessError::MalformedResourcePath { .. } => "MALFORMED_RESOURCE_PATH",
            AccessError::AccessDenied { .. } => "ACCESS_DENIED",
            AccessError::NoResolvers => "NO_RESOLVERS",
            AccessError::Store(_) => "POLICY_STORE_ERROR",
        }
    }

    /// HTTP-equivalent status a transport should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            AccessError::MalformedResourcePath { .. } => 400,
            AccessError::AccessDenied { .. } => 401,
            AccessError::NoResolvers | AccessError::Store(_) => 500,
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_message_names_only_request() {
        let err = AccessError::AccessDenied {
            principal: "user/u1".to_string(),
            resource: "doc/42".to_string(),
            requested: Permissions::READ | Permissions::UPDATE,
        };
        assert_eq!(
            err.to_string(),
            "user/u1 does not have permission(0x6) to access resource doc/42"
        );
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.error_code(), "ACCESS_DENIED");
    }
}
