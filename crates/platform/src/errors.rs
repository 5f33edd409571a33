use thiserror::Error;

/// Errors raised while loading, starting or stopping plugins
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Dependency for plugin {plugin} not found: {dependency}")]
    DependencyNotFound { plugin: String, dependency: String },

    #[error("Circular dependency for plugins detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Failed to initialise plugin {plugin}: {source}")]
    InitFailure {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid schedule for plugin {plugin}: {reason}")]
    InvalidSchedule { plugin: String, reason: String },

    /// A concurrent start of the same plugin did not reach `Started`
    #[error("Start of plugin {plugin} was aborted")]
    StartAborted { plugin: String },

    #[error("{phase} callback of plugin {plugin} failed: {source}")]
    CallbackFailed {
        plugin: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to discover extensions: {0}")]
    Discovery(String),
}

impl PluginError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PluginError::DependencyNotFound { .. } => "PLUGIN_DEPENDENCY_NOT_FOUND",
            PluginError::CircularDependency { .. } => "PLUGIN_CIRCULAR_DEPENDENCY",
            PluginError::InitFailure { .. } => "PLUGIN_INIT_FAILURE",
            PluginError::InvalidSchedule { .. } => "PLUGIN_INVALID_SCHEDULE",
            PluginError::StartAborted { .. } => "PLUGIN_START_ABORTED",
            PluginError::CallbackFailed { .. } => "PLUGIN_CALLBACK_FAILED",
            PluginError::Discovery(_) => "PLUGIN_DISCOVERY",
        }
    }

    /// Graph errors leave the host unable to serve requests
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PluginError::DependencyNotFound { .. } | PluginError::CircularDependency { .. }
        )
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_dependency_renders_chain() {
        let err = PluginError::CircularDependency {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency for plugins detected: a -> b -> a");
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "PLUGIN_CIRCULAR_DEPENDENCY");
    }

    #[test]
    fn init_failure_is_not_fatal() {
        let err = PluginError::InitFailure {
            plugin: "x".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("boom"));
    }
}
