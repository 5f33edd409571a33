//! The capability surface handed to an extension's init function.

use access::{AccessResult, Resource};
use async_trait::async_trait;
use common::{Schedule, ScheduledTask, TaskFn};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::endpoint::{handler, EndpointRegistration, HttpMethod, Request, Response};
use crate::errors::{PluginError, PluginResult};
use crate::socket::{SocketChannel, SocketOptions};

pub type LifecycleCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Implemented by [`Plugin`](crate::Plugin). Registrations made before the
/// plugin starts are deferred until it does; later ones apply immediately.
#[async_trait]
pub trait Service: Send + Sync {
    fn id(&self) -> String;

    /// Renames the plugin. Only honoured while init is still running.
    fn set_id(&self, id: &str);

    /// Span every log line of this plugin should be recorded in
    fn logger(&self) -> tracing::Span;

    fn on_start(&self, callback: LifecycleCallback);

    fn on_stop(&self, callback: LifecycleCallback);

    fn use_endpoint(&self, endpoint: EndpointRegistration);

    /// Find-or-create by path
    fn use_socket(&self, path: &str, options: SocketOptions) -> Arc<SocketChannel>;

    fn schedule_task(&self, schedule: Schedule, task: TaskFn) -> Arc<ScheduledTask>;

    /// Resolves through the platform's resolver chain; empty when none is configured.
    async fn get_resource(&self, path: &str) -> AccessResult<Vec<Resource>>;
}

/// Generic conveniences over [`Service`].
pub trait ServiceExt: Service {
    fn on_started<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_start(Arc::new(move || Box::pin(f())));
    }

    fn on_stopping<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_stop(Arc::new(move || Box::pin(f())));
    }

    fn endpoint<F, Fut>(&self, method: HttpMethod, path: &str, f: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        self.use_endpoint(EndpointRegistration::new(method, path, handler(f)));
    }

    /// `spec` is a cron expression, or a bare integer interval in milliseconds.
    fn schedule<F>(&self, spec: &str, task: F) -> PluginResult<Arc<ScheduledTask>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let schedule: Schedule = spec.parse().map_err(|e: common::HostError| PluginError::InvalidSchedule {
            plugin: self.id(),
            reason: e.to_string(),
        })?;
        Ok(self.schedule_task(schedule, Arc::new(task)))
    }

    fn schedule_every<F>(&self, millis: u64, task: F) -> PluginResult<Arc<ScheduledTask>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let schedule = Schedule::every_millis(millis).map_err(|e| PluginError::InvalidSchedule {
            plugin: self.id(),
            reason: e.to_string(),
        })?;
        Ok(self.schedule_task(schedule, Arc::new(task)))
    }
}

impl<T: Service + ?Sized> ServiceExt for T {}

/// One loadable unit of server functionality.
///
/// `init` declares registrations through `service` and returns the ids of
/// the plugins that must be started first.
#[async_trait]
pub trait Extension: Send + Sync {
    async fn init(&self, service: &dyn Service, options: &Value) -> anyhow::Result<Vec<String>>;
}
