//! Plugin lifecycle.
//!
//! A plugin runs its extension's init once at load time, capturing declared
//! dependencies and registrations. `start` brings dependencies up first,
//! siblings concurrently, then applies the deferred registrations:
//!
//! ```text
//! Created -> Starting -> Started -> Stopping -> Stopped
//!               ^                                  |
//!               +----------------------------------+
//! ```
//!
//! A plugin found `Starting` while its own id is already on the dependency
//! chain being started is a circular dependency. Top-level starts also check
//! the reachable graph up front, so a cycle is reported before any state
//! changes.

use access::{AccessResult, ChainedResourceResolver, Resource, ResourcePath};
use async_trait::async_trait;
use common::events;
use common::topics::{TOPIC_PLUGIN_STARTED, TOPIC_PLUGIN_STOPPED};
use common::{Schedule, ScheduledTask, TaskFn};
use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::endpoint::{EndpointRegistration, HttpMethod, Router};
use crate::errors::{PluginError, PluginResult};
use crate::registry::PluginRegistry;
use crate::service::{Extension, LifecycleCallback, Service};
use crate::socket::{SocketChannel, SocketOptions, SocketRegistrar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Pending,
    Ready,
    Failed,
}

enum StartTransition {
    Begin(PluginStatus),
    InProgress,
    NoOp,
}

/// What a plugin is loaded with
#[derive(Clone)]
pub struct PluginOptions {
    pub options: Value,
    pub registry: Arc<PluginRegistry>,
    pub resolver: Option<Arc<ChainedResourceResolver>>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            options: Value::Object(Map::new()),
            registry: PluginRegistry::global(),
            resolver: None,
        }
    }
}

impl PluginOptions {
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<ChainedResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

pub struct Plugin {
    id: RwLock<String>,
    status: watch::Sender<PluginStatus>,
    init: RwLock<InitOutcome>,
    init_error: Mutex<Option<PluginError>>,
    depends_on: RwLock<Vec<String>>,
    options: Value,
    endpoints: Mutex<Vec<EndpointRegistration>>,
    sockets: Mutex<Vec<Arc<SocketChannel>>>,
    tasks: Mutex<Vec<Arc<ScheduledTask>>>,
    start_callback: RwLock<Option<LifecycleCallback>>,
    stop_callback: RwLock<Option<LifecycleCallback>>,
    router: RwLock<Option<Arc<dyn Router>>>,
    socket_registrar: RwLock<Option<Arc<dyn SocketRegistrar>>>,
    resolver: Option<Arc<ChainedResourceResolver>>,
    registry: Arc<PluginRegistry>,
}

impl Plugin {
    fn new(id: String, options: PluginOptions) -> Self {
        let (status, _) = watch::channel(PluginStatus::Created);
        Self {
            id: RwLock::new(id),
            status,
            init: RwLock::new(InitOutcome::Pending),
            init_error: Mutex::new(None),
            depends_on: RwLock::new(Vec::new()),
            options: options.options,
            endpoints: Mutex::new(Vec::new()),
            sockets: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            start_callback: RwLock::new(None),
            stop_callback: RwLock::new(None),
            router: RwLock::new(None),
            socket_registrar: RwLock::new(None),
            resolver: options.resolver,
            registry: options.registry,
        }
    }

    /// Runs the extension's init. On success the plugin is registered under
    /// its (possibly renamed) id; on failure it is kept but never starts.
    pub async fn load(id: impl Into<String>, extension: Arc<dyn Extension>, options: PluginOptions) -> Arc<Plugin> {
        let plugin = Arc::new(Plugin::new(id.into(), options));
        let result = extension.init(plugin.as_ref(), &plugin.options).await;
        match result {
            Ok(depends_on) => {
                *plugin.depends_on.write() = depends_on;
                *plugin.init.write() = InitOutcome::Ready;
                plugin.registry.register(Arc::clone(&plugin));
            }
            Err(source) => {
                let failure = PluginError::InitFailure {
                    plugin: plugin.id(),
                    source,
                };
                warn!(plugin = %plugin.id(), error = %failure, "Failed to load plugin");
                *plugin.init.write() = InitOutcome::Failed;
                *plugin.init_error.lock() = Some(failure);
            }
        }
        plugin
    }

    pub fn status(&self) -> PluginStatus {
        *self.status.borrow()
    }

    /// Observe status transitions as they happen
    pub fn subscribe_status(&self) -> watch::Receiver<PluginStatus> {
        self.status.subscribe()
    }

    pub fn init_outcome(&self) -> InitOutcome {
        *self.init.read()
    }

    pub fn init_error(&self) -> Option<String> {
        self.init_error.lock().as_ref().map(ToString::to_string)
    }

    pub fn depends_on(&self) -> Vec<String> {
        self.depends_on.read().clone()
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    pub fn endpoints(&self) -> Vec<(HttpMethod, String)> {
        self.endpoints
            .lock()
            .iter()
            .map(|e| (e.method, e.path.clone()))
            .collect()
    }

    pub fn socket_paths(&self) -> Vec<String> {
        self.sockets
            .lock()
            .iter()
            .map(|s| s.path().to_string())
            .collect()
    }

    pub fn scheduled_tasks(&self) -> Vec<Arc<ScheduledTask>> {
        self.tasks.lock().clone()
    }

    pub fn with_router(&self, router: Arc<dyn Router>) -> &Self {
        *self.router.write() = Some(router);
        self
    }

    pub fn with_socket_registrar(&self, registrar: Arc<dyn SocketRegistrar>) -> &Self {
        *self.socket_registrar.write() = Some(registrar);
        self
    }

    pub async fn start(self: &Arc<Self>) -> PluginResult<()> {
        Arc::clone(self).start_with_chain(Vec::new()).await
    }

    pub fn start_with_chain(self: Arc<Self>, mut chain: Vec<String>) -> BoxFuture<'static, PluginResult<()>> {
        Box::pin(async move {
            let id = self.id();
            if self.init_outcome() != InitOutcome::Ready {
                debug!(plugin = %id, "not ready, start skipped");
                return Ok(());
            }

            if chain.is_empty() {
                if let Some(cycle) = self.registry.find_cycle(&id) {
                    error!(plugin = %id, chain = %cycle.join(" -> "), "Circular dependency for plugins detected");
                    return Err(PluginError::CircularDependency { chain: cycle });
                }
            }

            let previous = match self.begin_start() {
                StartTransition::Begin(previous) => previous,
                StartTransition::InProgress if chain.contains(&id) => {
                    chain.push(id);
                    return Err(PluginError::CircularDependency { chain });
                }
                StartTransition::InProgress => return self.wait_for_start(id).await,
                StartTransition::NoOp => return Ok(()),
            };

            debug!(plugin = %id, "Starting...");
            chain.push(id.clone());

            if let Err(e) = self.start_dependencies(&id, &chain).await {
                self.status.send_replace(previous);
                return Err(e);
            }

            self.apply_registrations(&id);

            let callback = self.start_callback.read().clone();
            if let Some(callback) = callback {
                if let Err(source) = callback().await {
                    self.withdraw_registrations();
                    self.status.send_replace(previous);
                    return Err(PluginError::CallbackFailed {
                        plugin: id,
                        phase: "start",
                        source,
                    });
                }
            }

            self.status.send_replace(PluginStatus::Started);
            info!(plugin = %id, "Started");
            events::publish(TOPIC_PLUGIN_STARTED, json!({ "plugin": id })).await;
            Ok(())
        })
    }

    fn begin_start(&self) -> StartTransition {
        let mut transition = StartTransition::NoOp;
        self.status.send_if_modified(|status| match *status {
            PluginStatus::Created | PluginStatus::Stopped => {
                transition = StartTransition::Begin(*status);
                *status = PluginStatus::Starting;
                true
            }
            PluginStatus::Starting => {
                transition = StartTransition::InProgress;
                false
            }
            PluginStatus::Started | PluginStatus::Stopping => false,
        });
        transition
    }

    /// Reached through an independent branch while another start is running.
    async fn wait_for_start(&self, id: String) -> PluginResult<()> {
        debug!(plugin = %id, "waiting for concurrent start");
        let mut status = self.status.subscribe();
        let settled = status
            .wait_for(|s| *s != PluginStatus::Starting)
            .await
            .map(|s| *s);
        match settled {
            Ok(PluginStatus::Started) => Ok(()),
            _ => Err(PluginError::StartAborted { plugin: id }),
        }
    }

    async fn start_dependencies(&self, id: &str, chain: &[String]) -> PluginResult<()> {
        let router = self.router.read().clone();
        let registrar = self.socket_registrar.read().clone();

        let mut pending = Vec::new();
        for dependency in self.depends_on() {
            let Some(plugin) = self.registry.get(&dependency) else {
                error!(plugin = %id, dependency = %dependency, "Failed to start plugin. Dependency not found");
                return Err(PluginError::DependencyNotFound {
                    plugin: id.to_string(),
                    dependency,
                });
            };
            if let Some(router) = &router {
                plugin.with_router(Arc::clone(router));
            }
            if let Some(registrar) = &registrar {
                plugin.with_socket_registrar(Arc::clone(registrar));
            }
            pending.push(plugin.start_with_chain(chain.to_vec()));
        }

        join_all(pending).await.into_iter().collect()
    }

    fn apply_registrations(&self, id: &str) {
        let endpoints = self.endpoints.lock().clone();
        match self.router.read().as_ref() {
            Some(router) => endpoints.into_iter().for_each(|e| router.register(id, e)),
            None if !endpoints.is_empty() => {
                warn!(plugin = %id, count = endpoints.len(), "no router attached, endpoints not registered")
            }
            None => {}
        }

        let sockets = self.sockets.lock().clone();
        match self.socket_registrar.read().as_ref() {
            Some(registrar) => sockets.into_iter().for_each(|s| registrar.register(s)),
            None if !sockets.is_empty() => {
                warn!(plugin = %id, count = sockets.len(), "no socket registrar attached, channels not registered")
            }
            None => {}
        }

        for task in self.tasks.lock().iter() {
            task.start();
        }
    }

    fn withdraw_registrations(&self) {
        let id = self.id();
        for task in self.tasks.lock().iter() {
            task.stop();
        }

        if let Some(router) = self.router.read().as_ref() {
            let mut seen = HashSet::new();
            for endpoint in self.endpoints.lock().iter() {
                if seen.insert(endpoint.path.clone()) {
                    router.unregister(&id, &endpoint.path);
                }
            }
        }

        if let Some(registrar) = self.socket_registrar.read().as_ref() {
            for channel in self.sockets.lock().iter() {
                registrar.unregister(channel.path());
            }
        }
    }

    /// Only effective from `Started`. Does not stop dependencies.
    pub async fn stop(&self) -> PluginResult<()> {
        let mut stopping = false;
        self.status.send_if_modified(|status| {
            if *status == PluginStatus::Started {
                *status = PluginStatus::Stopping;
                stopping = true;
            }
            stopping
        });
        if !stopping {
            return Ok(());
        }

        let id = self.id();
        debug!(plugin = %id, "Stopping...");
        let callback = self.stop_callback.read().clone();
        let outcome = match callback {
            Some(callback) => callback().await.map_err(|source| PluginError::CallbackFailed {
                plugin: id.clone(),
                phase: "stop",
                source,
            }),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            warn!(plugin = %id, error = %e, "stop callback failed");
        }

        self.withdraw_registrations();
        self.status.send_replace(PluginStatus::Stopped);
        info!(plugin = %id, "Stopped");
        events::publish(TOPIC_PLUGIN_STOPPED, json!({ "plugin": id })).await;
        outcome
    }
}

#[async_trait]
impl Service for Plugin {
    fn id(&self) -> String {
        self.id.read().clone()
    }

    fn set_id(&self, id: &str) {
        if self.init_outcome() == InitOutcome::Pending {
            *self.id.write() = id.to_string();
        } else {
            warn!(plugin = %self.id(), requested = id, "plugin id can only change during init");
        }
    }

    fn logger(&self) -> tracing::Span {
        tracing::info_span!("plugin", id = %self.id())
    }

    fn on_start(&self, callback: LifecycleCallback) {
        *self.start_callback.write() = Some(callback);
    }

    fn on_stop(&self, callback: LifecycleCallback) {
        *self.stop_callback.write() = Some(callback);
    }

    fn use_endpoint(&self, endpoint: EndpointRegistration) {
        self.endpoints.lock().push(endpoint.clone());
        if self.status() == PluginStatus::Started {
            if let Some(router) = self.router.read().as_ref() {
                router.register(&self.id(), endpoint);
            }
        }
    }

    fn use_socket(&self, path: &str, options: SocketOptions) -> Arc<SocketChannel> {
        let channel = {
            let mut sockets = self.sockets.lock();
            if let Some(existing) = sockets.iter().find(|s| s.path() == path) {
                return Arc::clone(existing);
            }
            let channel = Arc::new(SocketChannel::new(path, options));
            sockets.push(Arc::clone(&channel));
            channel
        };
        if self.status() == PluginStatus::Started {
            if let Some(registrar) = self.socket_registrar.read().as_ref() {
                registrar.register(Arc::clone(&channel));
            }
        }
        channel
    }

    fn schedule_task(&self, schedule: Schedule, task: TaskFn) -> Arc<ScheduledTask> {
        let task = {
            let mut tasks = self.tasks.lock();
            let label = format!("{}#{}", self.id(), tasks.len() + 1);
            let task = Arc::new(ScheduledTask::new(label, schedule, task));
            tasks.push(Arc::clone(&task));
            task
        };
        if self.status() == PluginStatus::Started {
            task.start();
        }
        task
    }

    async fn get_resource(&self, path: &str) -> AccessResult<Vec<Resource>> {
        match &self.resolver {
            Some(resolver) => resolver.resolve_str(path).await,
            None => {
                ResourcePath::parse(path)?;
                Ok(Vec::new())
            }
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("init", &self.init_outcome())
            .field("depends_on", &self.depends_on())
            .finish()
    }
}
