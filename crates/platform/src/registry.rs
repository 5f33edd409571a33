//! Process-wide plugin registry keyed by id.
//!
//! Plugins register themselves as soon as their init succeeds. An id
//! conflict is logged and the later plugin replaces the earlier one.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

use crate::plugin::Plugin;
use crate::service::Service;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<PluginRegistry> = Arc::new(PluginRegistry::new());
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<PluginRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn register(&self, plugin: Arc<Plugin>) -> Option<Arc<Plugin>> {
        let id = plugin.id();
        let previous = self.plugins.write().insert(id.clone(), plugin);
        if previous.is_some() {
            error!(plugin = %id, "Plugin ID conflict: multiple plugins have the same ID");
        } else {
            debug!(plugin = %id, "registered plugin");
        }
        previous
    }

    pub fn get(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.plugins.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.plugins.write().clear();
    }

    /// First dependency cycle reachable from `start`, as the visiting chain
    /// ending with the repeated id (`a -> b -> a`). Unknown ids are skipped.
    pub fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let graph: HashMap<String, Vec<String>> = self
            .plugins
            .read()
            .iter()
            .map(|(id, plugin)| (id.clone(), plugin.depends_on()))
            .collect();

        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();
        dfs_find_cycle(&graph, start, &mut visited, &mut on_path, &mut path)
    }
}

fn dfs_find_cycle(
    graph: &HashMap<String, Vec<String>>,
    node: &str,
    visited: &mut HashSet<String>,
    on_path: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    on_path.insert(node.to_string());
    path.push(node.to_string());

    for neighbor in graph.get(node).into_iter().flatten() {
        if on_path.contains(neighbor) {
            let mut chain = path.clone();
            chain.push(neighbor.clone());
            return Some(chain);
        }
        if !visited.contains(neighbor) && graph.contains_key(neighbor) {
            if let Some(chain) = dfs_find_cycle(graph, neighbor, visited, on_path, path) {
                return Some(chain);
            }
        }
    }

    on_path.remove(node);
    path.pop();
    None
}
