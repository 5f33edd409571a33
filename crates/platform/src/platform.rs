//! The orchestrator: loads platform services and discovered extensions,
//! starts them in dependency order and stops them in reverse.

use access::{
    AccessResult, ChainedResourceResolver, InMemoryResourceStore, ResourceResolver, ResourceStore,
    StoreResourceResolver,
};
use common::HostConfig;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::discovery::{discover, PluginCatalog};
use crate::endpoint::{InMemoryRouter, Router};
use crate::errors::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginOptions};
use crate::registry::PluginRegistry;
use crate::service::{Extension, Service};
use crate::services::PLATFORM_PREFIX;
use crate::socket::{InMemorySocketRegistrar, SocketRegistrar};

pub type ShutdownCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct PlatformBuilder {
    api_root: String,
    extension_roots: Vec<PathBuf>,
    extension_file_pattern: String,
    catalog: PluginCatalog,
    services: Vec<(String, Arc<dyn Extension>)>,
    resolvers: Vec<Arc<dyn ResourceResolver>>,
    resource_store: Arc<dyn ResourceStore>,
    router: Option<Arc<dyn Router>>,
    sockets: Option<Arc<dyn SocketRegistrar>>,
    registry: Arc<PluginRegistry>,
    on_shutdown: Option<ShutdownCallback>,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

impl PlatformBuilder {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            api_root: config.app.api_root.clone(),
            extension_roots: config.app.extension_roots.clone(),
            extension_file_pattern: config.app.extension_file_pattern.clone(),
            catalog: PluginCatalog::new(),
            services: Vec::new(),
            resolvers: Vec::new(),
            resource_store: Arc::new(InMemoryResourceStore::new()),
            router: None,
            sockets: None,
            registry: PluginRegistry::global(),
            on_shutdown: None,
        }
    }

    pub fn api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = root.into();
        self
    }

    pub fn extension_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.extension_roots = roots;
        self
    }

    pub fn extension_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.extension_file_pattern = pattern.into();
        self
    }

    pub fn catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// A platform service, started before any extension as `platform/<name>`.
    pub fn service(mut self, name: impl Into<String>, extension: Arc<dyn Extension>) -> Self {
        self.services.push((name.into(), extension));
        self
    }

    /// Consulted in order, ahead of the platform's own store resolver.
    pub fn resource_resolvers(mut self, resolvers: Vec<Arc<dyn ResourceResolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn resource_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.resource_store = store;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn socket_registrar(mut self, sockets: Arc<dyn SocketRegistrar>) -> Self {
        self.sockets = Some(sockets);
        self
    }

    pub fn registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_shutdown = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn build(self) -> AccessResult<Platform> {
        let mut resolvers = self.resolvers;
        resolvers.push(Arc::new(StoreResourceResolver::new(self.resource_store)));
        let resolver = Arc::new(ChainedResourceResolver::new(resolvers)?);

        let router = self
            .router
            .unwrap_or_else(|| Arc::new(InMemoryRouter::with_root(self.api_root.clone())));
        let sockets = self
            .sockets
            .unwrap_or_else(|| Arc::new(InMemorySocketRegistrar::new()));

        Ok(Platform {
            api_root: self.api_root,
            extension_roots: self.extension_roots,
            extension_file_pattern: self.extension_file_pattern,
            catalog: self.catalog,
            service_specs: self.services,
            resolver,
            router,
            sockets,
            registry: self.registry,
            on_shutdown: self.on_shutdown,
            services: Mutex::new(Vec::new()),
            extensions: Mutex::new(Vec::new()),
        })
    }
}

pub struct Platform {
    api_root: String,
    extension_roots: Vec<PathBuf>,
    extension_file_pattern: String,
    catalog: PluginCatalog,
    service_specs: Vec<(String, Arc<dyn Extension>)>,
    resolver: Arc<ChainedResourceResolver>,
    router: Arc<dyn Router>,
    sockets: Arc<dyn SocketRegistrar>,
    registry: Arc<PluginRegistry>,
    on_shutdown: Option<ShutdownCallback>,
    services: Mutex<Vec<Arc<Plugin>>>,
    extensions: Mutex<Vec<Arc<Plugin>>>,
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn resource_resolver(&self) -> Arc<ChainedResourceResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn router(&self) -> Arc<dyn Router> {
        Arc::clone(&self.router)
    }

    pub fn socket_registrar(&self) -> Arc<dyn SocketRegistrar> {
        Arc::clone(&self.sockets)
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn services(&self) -> Vec<Arc<Plugin>> {
        self.services.lock().clone()
    }

    pub fn extensions(&self) -> Vec<Arc<Plugin>> {
        self.extensions.lock().clone()
    }

    fn plugin_options(&self, options: Value) -> PluginOptions {
        PluginOptions::default()
            .with_options(options)
            .with_registry(Arc::clone(&self.registry))
            .with_resolver(Arc::clone(&self.resolver))
    }

    /// Services first, then extensions. Each layer is loaded concurrently
    /// and started plugin by plugin; any start failure aborts startup.
    pub async fn start(&self) -> PluginResult<()> {
        let services = join_all(self.service_specs.iter().map(|(name, extension)| {
            Plugin::load(
                format!("{PLATFORM_PREFIX}{name}"),
                Arc::clone(extension),
                self.plugin_options(Value::Object(Map::new())),
            )
        }))
        .await;
        *self.services.lock() = services.clone();
        if let Err(e) = self.start_layer(&services).await {
            error!(error = %e, "Failed to initialize platform service");
            return Err(e);
        }

        let mut discovered = Vec::new();
        for root in &self.extension_roots {
            discovered.extend(discover(root, &self.extension_file_pattern, "", &self.catalog).await?);
        }
        let extensions = join_all(discovered.into_iter().map(|found| {
            Plugin::load(found.id, found.extension, self.plugin_options(found.options))
        }))
        .await;
        *self.extensions.lock() = extensions.clone();
        self.start_layer(&extensions).await?;

        info!(
            services = services.len(),
            extensions = extensions.len(),
            api_root = %self.api_root,
            "platform started"
        );
        Ok(())
    }

    async fn start_layer(&self, plugins: &[Arc<Plugin>]) -> PluginResult<()> {
        for plugin in plugins {
            plugin
                .with_router(Arc::clone(&self.router))
                .with_socket_registrar(Arc::clone(&self.sockets));
            if let Err(e) = plugin.start().await {
                if let PluginError::CircularDependency { chain } = &e {
                    error!("Circular dependency for plugins detected: {}", chain.join(" -> "));
                } else {
                    error!(plugin = %plugin.id(), error = %e, "Failed to start plugin");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Extensions, then services; within a layer every stop runs to
    /// completion and failures are only logged.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let extensions = self.extensions();
        stop_layer("extension", &extensions).await;
        let services = self.services();
        stop_layer("platform service", &services).await;

        if let Some(callback) = &self.on_shutdown {
            callback().await?;
        }
        info!("platform stopped");
        Ok(())
    }
}

async fn stop_layer(layer: &str, plugins: &[Arc<Plugin>]) {
    debug!(layer, count = plugins.len(), "stopping layer");
    let results = join_all(plugins.iter().map(|p| p.stop())).await;
    for (plugin, result) in plugins.iter().zip(results) {
        if let Err(e) = result {
            warn!(layer, plugin = %plugin.id(), error = %e, "plugin did not stop cleanly");
        }
    }
}
