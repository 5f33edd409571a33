//! HTTP endpoint registrations and the router seam they are applied to.
//!
//! Transport is out of scope here: [`InMemoryRouter`] matches requests to
//! registrations and runs their handler chains so extensions can be exercised
//! without a network server.

use access::AccessError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_AUTH_PROVIDER: &str = "jwt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    All,
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::All => "ALL",
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }

    /// `All` registrations accept every method
    pub fn accepts(&self, method: HttpMethod) -> bool {
        *self == HttpMethod::All || *self == method
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(HttpMethod::All),
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "delete" => Ok(HttpMethod::Delete),
            "patch" => Ok(HttpMethod::Patch),
            "options" => Ok(HttpMethod::Options),
            "head" => Ok(HttpMethod::Head),
            other => Err(format!("unknown HTTP method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Option<HttpMethod>,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
    /// Authenticated principal, e.g. `user/alice`
    pub principal: Option<String>,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            path: path.into(),
            body: Value::Null,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

/// What a handler in a chain decided
pub enum Flow {
    Next(Request),
    Respond(Response),
}

pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<'static, anyhow::Result<Flow>> + Send + Sync>;

/// Wraps a terminal handler that always answers.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    Arc::new(move |req| {
        let fut = f(req);
        Box::pin(async move { fut.await.map(Flow::Respond) })
    })
}

/// Wraps a handler that may pass the request on to the rest of the chain.
pub fn middleware<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

#[derive(Clone)]
pub struct EndpointRegistration {
    pub method: HttpMethod,
    pub path: String,
    pub handlers: Vec<Handler>,
    /// `None` marks a public endpoint
    pub auth_providers: Option<Vec<String>>,
    /// Top-level JSON fields the request body must carry
    pub required_fields: Option<Vec<String>>,
}

impl EndpointRegistration {
    /// Paths are normalized to start with `/`.
    pub fn new(method: HttpMethod, path: impl Into<String>, handler: Handler) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            handlers: vec![handler],
            auth_providers: Some(vec![DEFAULT_AUTH_PROVIDER.to_string()]),
            required_fields: None,
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_authentication<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn public(mut self) -> Self {
        self.auth_providers = None;
        self
    }

    pub fn with_validation<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn requires_authentication(&self) -> bool {
        self.auth_providers.as_ref().is_some_and(|p| !p.is_empty())
    }

    fn missing_fields(&self, body: &Value) -> Vec<String> {
        self.required_fields
            .iter()
            .flatten()
            .filter(|field| body.get(field.as_str()).map_or(true, Value::is_null))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for EndpointRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistration")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handlers", &self.handlers.len())
            .field("auth_providers", &self.auth_providers)
            .field("required_fields", &self.required_fields)
            .finish()
    }
}

/// Registrations are owned by the plugin that made them, so two plugins
/// may serve the same path without stepping on each other's teardown.
pub trait Router: Send + Sync {
    fn register(&self, owner: &str, endpoint: EndpointRegistration);

    /// Removes `owner`'s registrations for `path`, returning how many were removed.
    fn unregister(&self, owner: &str, path: &str) -> usize;
}

#[derive(Clone)]
struct Route {
    owner: String,
    endpoint: EndpointRegistration,
}

#[derive(Default)]
pub struct InMemoryRouter {
    root: String,
    routes: RwLock<Vec<Route>>,
}

impl InMemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests are matched after stripping `root` from their path.
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn routes(&self) -> Vec<(HttpMethod, String)> {
        self.routes
            .read()
            .iter()
            .map(|r| (r.endpoint.method, r.endpoint.path.clone()))
            .collect()
    }

    /// Id of the plugin serving `method` at `path`, if any
    pub fn owner_of(&self, method: HttpMethod, path: &str) -> Option<String> {
        self.routes
            .read()
            .iter()
            .find(|r| r.endpoint.method == method && r.endpoint.path == path)
            .map(|r| r.owner.clone())
    }

    pub fn contains(&self, method: HttpMethod, path: &str) -> bool {
        self.routes
            .read()
            .iter()
            .any(|r| r.endpoint.method == method && r.endpoint.path == path)
    }

    /// Runs the first matching registration: authentication, then body
    /// validation, then the handler chain. Handler errors carrying an
    /// [`AccessError`] answer with its status.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let Some(relative) = request.path.strip_prefix(self.root.as_str()) else {
            return Response::error(404, "Not found");
        };
        let relative = relative.to_string();
        let Some(method) = request.method else {
            return Response::error(400, "Missing method");
        };

        let matched = self.routes.read().iter().find_map(|route| {
            let route = &route.endpoint;
            if !route.method.accepts(method) {
                return None;
            }
            match_path(&route.path, &relative).map(|params| (route.clone(), params))
        });
        let Some((route, params)) = matched else {
            return Response::error(404, "Not found");
        };

        if route.requires_authentication() && request.principal.is_none() {
            return Response::error(401, "Unauthorized");
        }
        let missing = route.missing_fields(&request.body);
        if !missing.is_empty() {
            return Response {
                status: 400,
                body: json!({ "error": "Invalid request body", "missing": missing }),
            };
        }

        request.params = params;
        debug!(method = %method, path = %route.path, "dispatching");
        for step in &route.handlers {
            match step(request).await {
                Ok(Flow::Next(next)) => request = next,
                Ok(Flow::Respond(response)) => return response,
                Err(e) => return error_response(&e),
            }
        }
        warn!(path = %route.path, "handler chain produced no response");
        Response::error(500, "No response")
    }
}

fn error_response(error: &anyhow::Error) -> Response {
    match error.downcast_ref::<AccessError>() {
        Some(access) => Response::error(access.status_code(), access.to_string()),
        None => {
            warn!(error = %error, "handler failed");
            Response::error(500, error.to_string())
        }
    }
}

/// Matches `/users/:userUid/permissions` style patterns.
fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let actual: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pattern.len() != actual.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (expected, segment) in pattern.iter().zip(&actual) {
        if let Some(name) = expected.strip_prefix(':') {
            if segment.is_empty() {
                return None;
            }
            params.insert(name.to_string(), (*segment).to_string());
        } else if expected != segment {
            return None;
        }
    }
    Some(params)
}

impl Router for InMemoryRouter {
    fn register(&self, owner: &str, endpoint: EndpointRegistration) {
        debug!(owner, method = %endpoint.method, path = %endpoint.path, "registering endpoint");
        self.routes.write().push(Route {
            owner: owner.to_string(),
            endpoint,
        });
    }

    fn unregister(&self, owner: &str, path: &str) -> usize {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|r| r.owner != owner || r.endpoint.path != path);
        let removed = before - routes.len();
        if removed > 0 {
            debug!(owner, path, removed, "unregistered endpoint");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Handler {
        handler(|req: Request| async move {
            Ok(Response::ok(json!({ "params": req.params, "principal": req.principal })))
        })
    }

    #[test]
    fn path_is_normalized_and_auth_defaults_to_jwt() {
        let reg = EndpointRegistration::new(HttpMethod::Get, "health", echo());
        assert_eq!(reg.path, "/health");
        assert_eq!(reg.auth_providers, Some(vec!["jwt".to_string()]));
        assert!(!reg.clone().public().requires_authentication());
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("PUT".parse::<HttpMethod>(), Ok(HttpMethod::Put));
        assert!(HttpMethod::All.accepts(HttpMethod::Delete));
        assert!(!HttpMethod::Get.accepts(HttpMethod::Post));
        assert!("brew".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn path_params_are_extracted() {
        let params = match_path("/users/:userUid/permissions", "/users/42/permissions").unwrap();
        assert_eq!(params.get("userUid").map(String::as_str), Some("42"));
        assert!(match_path("/users/:userUid", "/users").is_none());
        assert!(match_path("/users/:userUid", "/groups/1").is_none());
    }

    #[tokio::test]
    async fn dispatch_enforces_auth_and_validation() {
        let router = InMemoryRouter::with_root("/api");
        router.register("test", EndpointRegistration::new(HttpMethod::Post, "/items", echo()).with_validation(["name"]));
        router.register("test", EndpointRegistration::new(HttpMethod::Get, "/open", echo()).public());

        let anonymous = router.dispatch(Request::new(HttpMethod::Post, "/api/items")).await;
        assert_eq!(anonymous.status, 401);

        let invalid = router
            .dispatch(Request::new(HttpMethod::Post, "/api/items").with_principal("user/a"))
            .await;
        assert_eq!(invalid.status, 400);
        assert_eq!(invalid.body["missing"], json!(["name"]));

        let ok = router
            .dispatch(
                Request::new(HttpMethod::Post, "/api/items")
                    .with_principal("user/a")
                    .with_body(json!({ "name": "x" })),
            )
            .await;
        assert_eq!(ok.status, 200);

        assert_eq!(router.dispatch(Request::new(HttpMethod::Get, "/api/open")).await.status, 200);
        assert_eq!(router.dispatch(Request::new(HttpMethod::Get, "/open")).await.status, 404);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let router = InMemoryRouter::new();
        let guard = middleware(|req: Request| async move {
            if req.query.contains_key("deny") {
                Ok(Flow::Respond(Response::error(403, "Forbidden")))
            } else {
                Ok(Flow::Next(req))
            }
        });
        router.register("test", EndpointRegistration::new(HttpMethod::Get, "/guarded", guard).with_handler(echo()).public());

        let mut denied = Request::new(HttpMethod::Get, "/guarded");
        denied.query.insert("deny".into(), "1".into());
        assert_eq!(router.dispatch(denied).await.status, 403);
        assert_eq!(router.dispatch(Request::new(HttpMethod::Get, "/guarded")).await.status, 200);
    }

    #[tokio::test]
    async fn access_errors_map_to_their_status() {
        let router = InMemoryRouter::new();
        router.register(
            "test",
            EndpointRegistration::new(
                HttpMethod::Get,
                "/secret",
                handler(|_req: Request| async move {
                    Err(anyhow::Error::new(AccessError::malformed("oops")))
                }),
            )
            .public(),
        );
        assert_eq!(router.dispatch(Request::new(HttpMethod::Get, "/secret")).await.status, 400);
    }

    #[test]
    fn unregister_removes_all_methods_for_path() {
        let router = InMemoryRouter::new();
        router.register("test", EndpointRegistration::new(HttpMethod::Get, "/a", echo()));
        router.register("test", EndpointRegistration::new(HttpMethod::Post, "/a", echo()));
        router.register("test", EndpointRegistration::new(HttpMethod::Get, "/b", echo()));
        assert_eq!(router.unregister("test", "/a"), 2);
        assert_eq!(router.routes(), vec![(HttpMethod::Get, "/b".to_string())]);
        assert_eq!(router.unregister("test", "/a"), 0);
    }

    #[test]
    fn unregister_leaves_other_owners_routes() {
        let router = InMemoryRouter::new();
        router.register("notes", EndpointRegistration::new(HttpMethod::Get, "/shared", echo()));
        router.register("stats", EndpointRegistration::new(HttpMethod::Post, "/shared", echo()));

        assert_eq!(router.unregister("notes", "/shared"), 1);
        assert!(!router.contains(HttpMethod::Get, "/shared"));
        assert_eq!(router.owner_of(HttpMethod::Post, "/shared").as_deref(), Some("stats"));
        assert_eq!(router.unregister("ghost", "/shared"), 0);
    }
}
