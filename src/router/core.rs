use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::binder::ParamBindings;
use crate::dispatcher::BoundHandler;
use crate::error::RegistrationError;
use crate::metadata::Subject;
use crate::middleware::Middleware;

/// Everything the pipeline needs to serve one registered route.
pub struct RouteEntry {
    pub method: Method,
    /// Fully resolved path pattern, including the API and controller prefixes.
    pub path: String,
    pub subject: Subject,
    pub handler_key: String,
    pub requires_auth: bool,
    /// Composed per-route chain, in execution order.
    pub chain: Vec<Arc<dyn Middleware>>,
    pub bindings: ParamBindings,
    /// Success status code of the envelope.
    pub status_code: u16,
    pub handler: BoundHandler,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("controller", &self.subject.name())
            .field("handler_key", &self.handler_key)
            .field("requires_auth", &self.requires_auth)
            .field(
                "chain",
                &self.chain.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("bindings", &self.bindings)
            .field("status_code", &self.status_code)
            .finish_non_exhaustive()
    }
}

/// A matched route with its decoded path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub params: Map<String, Value>,
}

struct CompiledRoute {
    regex: Regex,
    param_names: Vec<String>,
    /// One byte per segment, 0 for literal and 1 for parameter; smaller sorts first.
    specificity: Vec<u8>,
    entry: Arc<RouteEntry>,
}

/// Route table matching `(method, path)` to a [`RouteEntry`].
///
/// Routes are kept ordered by specificity so literal segments win over parameters at the same
/// position; equally specific routes keep their insertion order.
#[derive(Default)]
pub struct Router {
    routes: Vec<CompiledRoute>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Add `entry`. Returns `Ok(false)` when a route with the same method and pattern is
    /// already registered; the new one is then dropped.
    pub fn insert(&mut self, entry: RouteEntry) -> Result<bool, RegistrationError> {
        let (regex, param_names, specificity) = compile_pattern(&entry.path)?;

        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| r.entry.method == entry.method && r.regex.as_str() == regex.as_str())
        {
            warn!(
                method = %entry.method,
                path = %entry.path,
                existing_handler = %existing.entry.handler_key,
                ignored_handler = %entry.handler_key,
                "Route already registered - ignoring duplicate"
            );
            return Ok(false);
        }

        let at = self
            .routes
            .iter()
            .position(|r| r.specificity > specificity)
            .unwrap_or(self.routes.len());
        self.routes.insert(
            at,
            CompiledRoute {
                regex,
                param_names,
                specificity,
                entry: Arc::new(entry),
            },
        );
        Ok(true)
    }

    /// Match a request. Path parameters are percent-decoded; a trailing slash is ignored.
    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        // RT1: Route match attempt
        debug!(method = %method, path = %path, "Route match attempt");

        for route in self.routes.iter().filter(|r| r.entry.method == *method) {
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };
            let mut params = Map::new();
            for (name, value) in route.param_names.iter().zip(captures.iter().skip(1)) {
                let raw = value.map_or("", |m| m.as_str());
                let decoded = urlencoding::decode(raw)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                params.insert(name.clone(), Value::String(decoded));
            }
            // RT2: Route matched
            debug!(
                method = %method,
                path = %path,
                route_pattern = %route.entry.path,
                handler = %route.entry.handler_key,
                "Route matched"
            );
            return Some(RouteMatch {
                entry: Arc::clone(&route.entry),
                params,
            });
        }

        // RT3: No route found
        debug!(method = %method, path = %path, "No route matched");
        None
    }

    /// Registered routes in match order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<RouteEntry>> {
        self.routes.iter().map(|r| &r.entry)
    }

    /// Log the routing table.
    pub fn log_routes(&self) {
        let summary: Vec<String> = self
            .entries()
            .map(|e| format!("{} {}", e.method, e.path))
            .collect();
        info!(
            routes_count = self.routes.len(),
            routes = ?summary,
            "Routing table loaded"
        );
    }

    /// Print all registered routes to stdout
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.routes.len());
        for entry in self.entries() {
            let guard = if entry.requires_auth { " [auth]" } else { "" };
            println!(
                "[route] {} {} -> {}::{}{guard}",
                entry.method,
                entry.path,
                entry.subject.name(),
                entry.handler_key
            );
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries().map(|e| format!("{} {}", e.method, e.path)))
            .finish()
    }
}

/// Compile a route pattern into an anchored regex.
///
/// `:name` and `{name}` segments capture one path segment; everything else matches literally.
/// An optional trailing slash is accepted.
pub(crate) fn compile_pattern(
    path: &str,
) -> Result<(Regex, Vec<String>, Vec<u8>), RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidRoutePattern {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');
    let mut param_names: Vec<String> = Vec::new();
    let mut specificity = Vec::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let param = segment
            .strip_prefix(':')
            .or_else(|| segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')));
        match param {
            Some(name) => {
                if name.is_empty() {
                    return Err(invalid("empty parameter name"));
                }
                if param_names.iter().any(|n| n == name) {
                    return Err(invalid("duplicate parameter name"));
                }
                pattern.push_str("/([^/]+)");
                param_names.push(name.to_string());
                specificity.push(1);
            }
            None => {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
                specificity.push(0);
            }
        }
    }

    pattern.push_str("/?$");
    let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
    Ok((regex, param_names, specificity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Arguments;
    use crate::dispatcher::Reply;
    use crate::error::HttpError;
    use serde_json::json;

    struct Users;

    fn entry(method: Method, path: &str, key: &str) -> RouteEntry {
        RouteEntry {
            method,
            path: path.to_string(),
            subject: Subject::of::<Users>(),
            handler_key: key.to_string(),
            requires_auth: false,
            chain: Vec::new(),
            bindings: ParamBindings::default(),
            status_code: 200,
            handler: Arc::new(|_: Arguments| Ok::<_, HttpError>(Reply::Empty)),
        }
    }

    #[test]
    fn test_express_and_brace_params() {
        let mut router = Router::new();
        router.insert(entry(Method::GET, "/users/:id", "one")).unwrap();
        router
            .insert(entry(Method::GET, "/orgs/{org}/teams/{team}", "team"))
            .unwrap();

        let m = router.route(&Method::GET, "/users/42").unwrap();
        assert_eq!(m.entry.handler_key, "one");
        assert_eq!(Value::Object(m.params), json!({ "id": "42" }));

        let m = router.route(&Method::GET, "/orgs/a/teams/b").unwrap();
        assert_eq!(Value::Object(m.params), json!({ "org": "a", "team": "b" }));
    }

    #[test]
    fn test_literal_beats_param() {
        let mut router = Router::new();
        router.insert(entry(Method::GET, "/users/:id", "one")).unwrap();
        router.insert(entry(Method::GET, "/users/bulk", "bulk")).unwrap();
        let m = router.route(&Method::GET, "/users/bulk").unwrap();
        assert_eq!(m.entry.handler_key, "bulk");
    }

    #[test]
    fn test_trailing_slash_and_decoding() {
        let mut router = Router::new();
        router.insert(entry(Method::GET, "/files/:name", "file")).unwrap();
        let m = router.route(&Method::GET, "/files/a%20b/").unwrap();
        assert_eq!(m.params["name"], "a b");
    }

    #[test]
    fn test_method_must_match() {
        let mut router = Router::new();
        router.insert(entry(Method::POST, "/users", "create")).unwrap();
        assert!(router.route(&Method::GET, "/users").is_none());
        assert!(router.route(&Method::POST, "/users").is_some());
    }

    #[test]
    fn test_duplicate_pattern_ignored() {
        let mut router = Router::new();
        assert!(router.insert(entry(Method::GET, "/users/:id", "a")).unwrap());
        assert!(!router.insert(entry(Method::GET, "/users/{id}", "b")).unwrap());
        assert_eq!(router.len(), 1);
        let m = router.route(&Method::GET, "/users/1").unwrap();
        assert_eq!(m.entry.handler_key, "a");
    }

    #[test]
    fn test_literal_segments_are_escaped() {
        let mut router = Router::new();
        router.insert(entry(Method::GET, "/v1.0/items", "items")).unwrap();
        assert!(router.route(&Method::GET, "/v1x0/items").is_none());
        assert!(router.route(&Method::GET, "/v1.0/items").is_some());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(compile_pattern("/users/:").is_err());
        assert!(compile_pattern("/a/:id/b/{id}").is_err());
    }

    #[test]
    fn test_root_route() {
        let mut router = Router::new();
        router.insert(entry(Method::GET, "/", "root")).unwrap();
        assert!(router.route(&Method::GET, "/").is_some());
        assert!(router.route(&Method::GET, "/x").is_none());
    }
}
