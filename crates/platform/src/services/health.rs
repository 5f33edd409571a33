use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::endpoint::{handler, EndpointRegistration, HttpMethod, Request, Response};
use crate::service::{Extension, Service};

/// `GET /health`, answered without authentication.
pub struct HealthService {
    version: String,
}

impl HealthService {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl Extension for HealthService {
    async fn init(&self, service: &dyn Service, _options: &Value) -> anyhow::Result<Vec<String>> {
        let version = self.version.clone();
        service.logger().in_scope(|| info!(version = %version, "Server version"));

        service.use_endpoint(
            EndpointRegistration::new(
                HttpMethod::Get,
                "/health",
                handler(move |_req: Request| {
                    let version = version.clone();
                    async move { Ok(Response::ok(json!({ "status": "ok", "version": version }))) }
                }),
            )
            .public(),
        );
        Ok(Vec::new())
    }
}
