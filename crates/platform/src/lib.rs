//! Plugin host.
//!
//! Extensions implement [`Extension`] and are wrapped in a [`Plugin`], which
//! owns their lifecycle: dependency-ordered start, deferred endpoint, socket
//! and task registration, and teardown on stop. The [`Platform`] loads the
//! built-in services and the extensions discovered on disk and drives them
//! as a whole.

pub mod discovery;
pub mod endpoint;
pub mod errors;
pub mod platform;
pub mod plugin;
pub mod registry;
pub mod service;
pub mod services;
pub mod socket;

pub use discovery::{discover, DiscoveredPlugin, PluginCatalog, PluginManifest};
pub use endpoint::{
    handler, middleware, EndpointRegistration, Flow, Handler, HttpMethod, InMemoryRouter, Request,
    Response, Router,
};
pub use errors::{PluginError, PluginResult};
pub use platform::{Platform, PlatformBuilder, ShutdownCallback};
pub use plugin::{InitOutcome, Plugin, PluginOptions, PluginStatus};
pub use registry::PluginRegistry;
pub use service::{Extension, LifecycleCallback, Service, ServiceExt};
pub use services::{HealthService, PermissionsService, PLATFORM_PREFIX};
pub use socket::{Codec, Connection, InMemorySocketRegistrar, SocketChannel, SocketOptions, SocketRegistrar};
