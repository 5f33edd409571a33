//! Extension discovery.
//!
//! Extensions are compiled in and listed in a [`PluginCatalog`] by entry
//! name. Which of them run, under which ids and with which options, is
//! decided by manifest files found under the configured extension roots:
//!
//! ```toml
//! # extensions/todo/todo.plugin.toml
//! entry = "todo"
//! id = "todo"          # optional, defaults to the path below the root
//!
//! [options]
//! page_size = 50
//! ```

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs, task};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{PluginError, PluginResult};
use crate::service::Extension;

#[derive(Clone, Default)]
pub struct PluginCatalog {
    entries: HashMap<String, Arc<dyn Extension>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, extension: Arc<dyn Extension>) -> Self {
        self.register(name, extension);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, extension: Arc<dyn Extension>) {
        let name = name.into();
        if self.entries.insert(name.clone(), extension).is_some() {
            warn!(entry = %name, "replaced catalog entry");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub entry: String,
    pub id: Option<String>,
    #[serde(default)]
    pub options: Value,
}

/// A manifest paired with the extension its entry names.
#[derive(Clone)]
pub struct DiscoveredPlugin {
    pub id: String,
    pub manifest_path: PathBuf,
    pub options: Value,
    pub extension: Arc<dyn Extension>,
}

impl std::fmt::Debug for DiscoveredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredPlugin")
            .field("id", &self.id)
            .field("manifest_path", &self.manifest_path)
            .finish()
    }
}

/// Manifest files below `root` whose file name matches `pattern`, sorted.
pub fn scan_manifests(root: &Path, pattern: &str) -> PluginResult<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(pattern)
        .map_err(|e| PluginError::Discovery(format!("invalid extension file pattern {pattern:?}: {e}")))?;
    if !root.is_dir() {
        warn!(root = %root.display(), "extension root does not exist");
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| pattern.matches(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Id derived from a manifest location: the path below `root` with every
/// extension stripped from the file name (`todo/todo.plugin.toml` → `todo/todo`).
pub fn manifest_id(root: &Path, manifest: &Path) -> String {
    let relative = manifest.strip_prefix(root).unwrap_or(manifest);
    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let file_name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default().to_string();
    parts.push(stem);
    parts.join("/")
}

pub async fn read_manifest(path: &Path) -> anyhow::Result<PluginManifest> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let mut manifest: PluginManifest =
        toml::from_str(&content).with_context(|| format!("invalid manifest {}", path.display()))?;
    if manifest.options.is_null() {
        manifest.options = Value::Object(Map::new());
    }
    Ok(manifest)
}

/// Resolves every manifest under `root` against the catalog. Unreadable
/// manifests and unknown entries are logged and skipped. The directory walk
/// runs on the blocking pool.
pub async fn discover(
    root: &Path,
    pattern: &str,
    id_prefix: &str,
    catalog: &PluginCatalog,
) -> PluginResult<Vec<DiscoveredPlugin>> {
    let (scan_root, scan_pattern) = (root.to_path_buf(), pattern.to_string());
    let paths = task::spawn_blocking(move || scan_manifests(&scan_root, &scan_pattern))
        .await
        .map_err(|e| PluginError::Discovery(format!("manifest scan of {} failed: {e}", root.display())))??;

    let mut discovered = Vec::new();
    for path in paths {
        let manifest = match read_manifest(&path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(manifest = %path.display(), error = %format!("{e:#}"), "Failed to load extension");
                continue;
            }
        };
        let Some(extension) = catalog.get(&manifest.entry) else {
            warn!(manifest = %path.display(), entry = %manifest.entry, "unknown extension entry");
            continue;
        };
        let id = format!(
            "{id_prefix}{}",
            manifest.id.clone().unwrap_or_else(|| manifest_id(root, &path))
        );
        debug!(plugin = %id, manifest = %path.display(), "discovered extension");
        discovered.push(DiscoveredPlugin {
            id,
            manifest_path: path,
            options: manifest.options,
            extension,
        });
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;

    struct Noop;

    #[async_trait]
    impl Extension for Noop {
        async fn init(&self, _service: &dyn crate::Service, _options: &Value) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn manifest_id_strips_all_extensions() {
        let root = Path::new("/ext");
        assert_eq!(manifest_id(root, Path::new("/ext/todo/todo.plugin.toml")), "todo/todo");
        assert_eq!(manifest_id(root, Path::new("/ext/health.plugin.toml")), "health");
    }

    #[tokio::test]
    async fn discovers_matching_manifests_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(
            dir.path().join("notes/notes.plugin.toml"),
            "entry = \"noop\"\n[options]\nlimit = 5\n",
        )
        .unwrap();
        fs::write(dir.path().join("named.plugin.toml"), "entry = \"noop\"\nid = \"custom\"\n").unwrap();
        fs::write(dir.path().join("ghost.plugin.toml"), "entry = \"missing\"\n").unwrap();
        fs::write(dir.path().join("broken.plugin.toml"), "entry = [").unwrap();
        fs::write(dir.path().join("readme.toml"), "entry = \"noop\"\n").unwrap();

        let catalog = PluginCatalog::new().with("noop", Arc::new(Noop));
        let found = discover(dir.path(), "*.plugin.toml", "ext/", &catalog).await.unwrap();

        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ext/custom", "ext/notes/notes"]);
        assert_eq!(found[1].options["limit"], 5);
        assert!(found[0].options.is_object());
    }

    #[tokio::test]
    async fn manifests_are_read_without_blocking_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.plugin.toml"), "entry = \"noop\"\n").unwrap();
        let catalog = PluginCatalog::new().with("noop", Arc::new(Noop));

        // Single-threaded runtime: a concurrent timer still fires while discovery runs
        let (found, ticked) = tokio::join!(
            discover(dir.path(), "*.plugin.toml", "", &catalog),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                true
            }
        );
        assert!(ticked);
        assert_eq!(found.unwrap().len(), 1);

        let manifest = read_manifest(&dir.path().join("a.plugin.toml")).await.unwrap();
        assert_eq!(manifest.entry, "noop");
        assert!(manifest.options.is_object());
        assert!(read_manifest(&dir.path().join("absent.plugin.toml")).await.is_err());
    }

    #[test]
    fn missing_root_yields_nothing_and_bad_pattern_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_manifests(&dir.path().join("absent"), "*.toml").unwrap().is_empty());
        assert!(matches!(scan_manifests(dir.path(), "[").unwrap_err(), PluginError::Discovery(_)));
    }
}
