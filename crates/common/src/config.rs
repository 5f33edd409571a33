//! Host configuration and its loader.
//!
//! Files are layered in order (`host.toml`, `config/default.toml`,
//! `config/<HOST_ENV>.toml`, then any explicit path), deep-merged table by
//! table, and finally overridden by `HOST_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::errors::HostResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub app: AppConfig,
    pub logging: LogConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub api_root: String,
    pub extension_roots: Vec<PathBuf>,
    /// Glob matched against manifest file names during discovery
    pub extension_file_pattern: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            api_root: "/api".to_string(),
            extension_roots: vec![PathBuf::from("extensions")],
            extension_file_pattern: "*.plugin.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Principal that bypasses every permission check
    pub root_user: Option<String>,
    /// Group granted administrative permissions at startup
    pub admin_group_uid: Option<String>,
    pub anonymous_user: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            root_user: None,
            admin_group_uid: None,
            anonymous_user: "user/anonymous".to_string(),
        }
    }
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_paths: Self::default_config_paths(),
            env_prefix: "HOST_".to_string(),
        }
    }

    /// Explicit paths are applied last and therefore win over the defaults.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_paths.push(path.into());
        self
    }

    /// Replace the search list entirely.
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.config_paths = paths;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("host.toml"),
            PathBuf::from("config").join("default.toml"),
        ];
        if let Ok(profile) = env::var("HOST_ENV") {
            paths.push(PathBuf::from("config").join(format!("{profile}.toml")));
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("hostd").join("config.toml"));
        }
        paths
    }

    pub async fn load(&self) -> HostResult<HostConfig> {
        let merged = self.load_layers().await?;
        let config: HostConfig = merged.try_into().map_err(|e: toml::de::Error| {
            crate::host_error!(Configuration, "invalid configuration: {e}")
        })?;
        let prefix = self.env_prefix.clone();
        self.apply_overrides(config, |key| env::var(format!("{prefix}{key}")).ok())
    }

    async fn load_layers(&self) -> HostResult<toml::Value> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            let layer = Self::load_file(path).await?;
            info!("Loaded configuration from: {}", path.display());
            merge_values(&mut merged, layer);
        }
        Ok(merged)
    }

    async fn load_file(path: &Path) -> HostResult<toml::Value> {
        let content = fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| {
            crate::host_error!(Configuration, "failed to parse {}: {e}", path.display())
        })
    }

    /// Apply `<PREFIX><SECTION>_<KEY>` overrides; `lookup` receives the key
    /// without the prefix.
    pub fn apply_overrides<F>(&self, mut config: HostConfig, lookup: F) -> HostResult<HostConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("APP_PORT") {
            config.app.port = port
                .parse()
                .map_err(|_| crate::host_error!(Configuration, "APP_PORT is not a port: {port}"))?;
        }
        if let Some(api_root) = lookup("APP_API_ROOT") {
            config.app.api_root = api_root;
        }
        if let Some(roots) = lookup("APP_EXTENSION_ROOTS") {
            config.app.extension_roots = roots
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(pattern) = lookup("APP_EXTENSION_FILE_PATTERN") {
            config.app.extension_file_pattern = pattern;
        }
        if let Some(level) = lookup("LOGGING_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = lookup("LOGGING_JSON") {
            config.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(root) = lookup("AUTH_ROOT_USER") {
            config.auth.root_user = Some(root);
        }
        if let Some(group) = lookup("AUTH_ADMIN_GROUP_UID") {
            config.auth.admin_group_uid = Some(group);
        }
        if let Some(anonymous) = lookup("AUTH_ANONYMOUS_USER") {
            config.auth.anonymous_user = anonymous;
        }
        debug!("Configuration after overrides: {:?}", config);
        Ok(config)
    }
}

/// Deep merge: tables merge key by key, everything else is replaced.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HostError;
    use std::collections::HashMap;

    #[tokio::test]
    async fn layers_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("default.toml");
        let overlay = dir.path().join("prod.toml");
        std::fs::write(
            &base,
            "[app]\nport = 8080\napi_root = \"/v1\"\n[auth]\nroot_user = \"user/root\"\n",
        )
        .unwrap();
        std::fs::write(&overlay, "[app]\nport = 9090\n").unwrap();

        let loader = ConfigLoader::new().with_paths(vec![base, overlay]);
        let config = loader.load_layers().await.unwrap();
        let config: HostConfig = config.try_into().unwrap();

        assert_eq!(config.app.port, 9090);
        assert_eq!(config.app.api_root, "/v1");
        assert_eq!(config.auth.root_user.as_deref(), Some("user/root"));
        assert_eq!(config.app.extension_file_pattern, "*.plugin.toml");
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APP_PORT", "5000"),
            ("APP_EXTENSION_ROOTS", "ext, more/ext"),
            ("LOGGING_JSON", "true"),
            ("AUTH_ADMIN_GROUP_UID", "admins"),
        ]);
        let loader = ConfigLoader::new();
        let config = loader
            .apply_overrides(HostConfig::default(), |k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.app.port, 5000);
        assert_eq!(
            config.app.extension_roots,
            vec![PathBuf::from("ext"), PathBuf::from("more/ext")]
        );
        assert!(config.logging.json);
        assert_eq!(config.auth.admin_group_uid.as_deref(), Some("admins"));
    }

    #[test]
    fn bad_port_is_a_configuration_error() {
        let loader = ConfigLoader::new();
        let err = loader
            .apply_overrides(HostConfig::default(), |k| {
                (k == "APP_PORT").then(|| "eighty".to_string())
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[app\nport = ").unwrap();
        let err = ConfigLoader::new()
            .with_paths(vec![path])
            .load_layers()
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Configuration(_)));
    }
}
