use std::time::Duration;

use http::Method;

use super::{Middleware, MiddlewareResult};
use crate::config::CorsConfig;
use crate::context::RequestContext;
use crate::dispatcher::HandlerResponse;

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// Answers preflight `OPTIONS` requests with 204 before routing and adds CORS headers to every
/// response.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
}

impl CorsMiddleware {
    /// Create a new CORS middleware with specific configuration
    ///
    /// ```rust
    /// use routemark::middleware::CorsMiddleware;
    /// use http::Method;
    ///
    /// let cors = CorsMiddleware::new(
    ///     vec!["https://example.com".to_string()],
    ///     vec!["Content-Type".to_string()],
    ///     vec![Method::GET, Method::POST],
    /// );
    /// ```
    pub fn new(
        allowed_origins: Vec<String>,
        allowed_headers: Vec<String>,
        allowed_methods: Vec<Method>,
    ) -> Self {
        Self {
            allowed_origins,
            allowed_headers,
            allowed_methods,
            allow_credentials: false,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Build from the `cors` section of the server configuration. Unknown methods are skipped.
    #[must_use]
    pub fn from_config(config: &CorsConfig) -> Self {
        let methods = config
            .allowed_methods
            .iter()
            .filter_map(|m| m.to_ascii_uppercase().parse::<Method>().ok())
            .collect();
        Self::new(
            config.allowed_origins.clone(),
            config.allowed_headers.clone(),
            methods,
        )
        .with_credentials(config.allow_credentials)
    }

    /// Value for `Access-Control-Allow-Origin`: `*`, or the request origin when it is allowed.
    fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            return Some(match (origin, self.allow_credentials) {
                (Some(o), true) => o.to_string(),
                _ => "*".to_string(),
            });
        }
        let origin = origin?;
        self.allowed_origins
            .iter()
            .any(|o| o == origin)
            .then(|| origin.to_string())
    }
}

/// Permissive policy: all origins, common methods.
impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new(
            vec!["*".into()],
            vec!["Content-Type".into(), "Authorization".into()],
            vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
        )
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "Cors"
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        if ctx.request.lock().method == Method::OPTIONS {
            Ok(Some(HandlerResponse::empty(204)))
        } else {
            Ok(None)
        }
    }

    fn after(&self, ctx: &RequestContext, res: &mut HandlerResponse, _latency: Duration) {
        let origin = ctx.request.header("origin");
        let Some(allow_origin) = self.allow_origin(origin.as_deref()) else {
            return;
        };
        if allow_origin != "*" {
            res.set_header("Vary", "Origin".to_string());
        }
        res.set_header("Access-Control-Allow-Origin", allow_origin);
        res.set_header(
            "Access-Control-Allow-Headers",
            self.allowed_headers.join(", "),
        );
        let methods = self
            .allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        res.set_header("Access-Control-Allow-Methods", methods);
        if self.allow_credentials {
            res.set_header("Access-Control-Allow-Credentials", "true".to_string());
        }
    }
}
