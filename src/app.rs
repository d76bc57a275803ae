//! # Application
//!
//! [`ServerBuilder`] collects controllers, the container, framework-level middlewares, the
//! optional guard and the error handler. [`ServerBuilder::build`] runs the registration pass
//! and returns an immutable [`Application`], which is shared by every request coroutine.
//!
//! ## Request pipeline
//!
//! 1. Framework-level middlewares, in order (CORS first when enabled)
//! 2. Route lookup; no match is a 404 through the error handler
//! 3. The route's composed chain (guard, shared, marker and route-level middlewares)
//! 4. [`dispatch`] to the bound handler
//! 5. `after` hooks in reverse order for every middleware whose `before` ran
//!
//! A middleware answering with a response, or writing one through the context, stops the
//! pipeline at that point. Errors from any stage go to the [`ErrorHandler`].

use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::annotations::Controller;
use crate::config::ServerConfig;
use crate::container::Container;
use crate::context::{HttpRequest, RequestContext};
use crate::dispatcher::{dispatch, HandlerResponse};
use crate::error::{DefaultErrorHandler, ErrorHandler, HttpError, RegistrationError};
use crate::metadata::MetadataStore;
use crate::middleware::{CorsMiddleware, Middleware, MiddlewareResult};
use crate::registration::register;
use crate::router::Router;
use crate::server::{AppService, HttpServer, ServerHandle};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builder for an [`Application`].
///
/// ```
/// use routemark::{Arguments, Controller, ControllerDef, ServerBuilder, ServerConfig};
/// use serde_json::json;
///
/// #[derive(Default)]
/// struct Health;
///
/// impl Controller for Health {
///     fn describe(def: &mut ControllerDef<'_, Self>) {
///         def.prefix("health");
///         def.get("", "check", |_: &Health, _: Arguments| json!({ "status": "ok" }));
///     }
/// }
///
/// let app = ServerBuilder::new(ServerConfig::default())
///     .controller_default::<Health>()
///     .build()
///     .unwrap();
/// assert_eq!(app.routes().len(), 1);
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    store: MetadataStore,
    container: Container,
    globals: Vec<Arc<dyn Middleware>>,
    guard: Option<Arc<dyn Middleware>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    cors: Option<Arc<dyn Middleware>>,
}

impl ServerBuilder {
    /// CORS is enabled when `config.cors` is present.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let cors = config
            .cors
            .as_ref()
            .map(|c| Arc::new(CorsMiddleware::from_config(c)) as Arc<dyn Middleware>);
        Self {
            config,
            store: MetadataStore::new(),
            container: Container::new(),
            globals: Vec::new(),
            guard: None,
            error_handler: None,
            cors,
        }
    }

    #[must_use]
    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.api_prefix = prefix.into();
        self
    }

    /// Add a framework-level middleware; runs before routing, in registration order.
    #[must_use]
    pub fn use_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.globals.push(Arc::new(middleware));
        self
    }

    /// Guard run first on every route that requires authentication.
    #[must_use]
    pub fn protect_routes(mut self, guard: impl Middleware + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Enable CORS, replacing any configuration from the config file.
    #[must_use]
    pub fn enable_cors(mut self, cors: CorsMiddleware) -> Self {
        self.cors = Some(Arc::new(cors));
        self
    }

    /// Container used to resolve controller instances and their dependencies.
    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    /// Declare `C`; its instance must be provided through the container.
    #[must_use]
    pub fn controller<C: Controller>(mut self) -> Self {
        self.store.declare::<C>();
        self
    }

    /// Declare `C` with a ready-made instance.
    #[must_use]
    pub fn controller_instance<C: Controller>(mut self, controller: C) -> Self {
        self.container.register_instance(controller);
        self.controller::<C>()
    }

    /// Declare `C`, built with `C::default()`.
    #[must_use]
    pub fn controller_default<C: Controller + Default>(mut self) -> Self {
        if !self.container.contains::<C>() {
            self.container.register_default::<C>();
        }
        self.controller::<C>()
    }

    /// Run the registration pass.
    pub fn build(self) -> Result<Application, RegistrationError> {
        let router = register(
            &self.store,
            &self.container,
            self.guard.as_ref(),
            &self.config.api_prefix,
        )?;

        let mut globals = Vec::with_capacity(self.globals.len() + 1);
        globals.extend(self.cors);
        globals.extend(self.globals);

        let production = self.config.is_production();
        let error_handler = self.error_handler.unwrap_or_else(|| {
            Arc::new(DefaultErrorHandler::new(production)) as Arc<dyn ErrorHandler>
        });

        info!(
            routes = router.len(),
            controllers = self.store.controllers().len(),
            middlewares = globals.len(),
            api_prefix = %self.config.api_prefix,
            "Application built"
        );

        Ok(Application {
            config: self.config,
            store: self.store,
            router,
            globals,
            error_handler,
        })
    }
}

/// The built request pipeline.
pub struct Application {
    config: ServerConfig,
    store: MetadataStore,
    router: Router,
    globals: Vec<Arc<dyn Middleware>>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Application {
    #[must_use]
    pub fn routes(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run `request` through the pipeline and return the single response for it.
    pub fn handle(&self, request: HttpRequest) -> HandlerResponse {
        let start = Instant::now();
        let request_id = request.request_id;
        let ctx = RequestContext::new(request);
        let mut ran: Vec<Arc<dyn Middleware>> = Vec::new();

        let outcome = self.run(&ctx, &mut ran);
        let mut response = match outcome {
            Ok(Some(resp)) => resp,
            Ok(None) => match ctx.response.take() {
                Some(resp) => resp,
                None => self
                    .error_handler
                    .handle(&HttpError::internal("No response was produced"), &ctx),
            },
            Err(err) => {
                // A response written before the failure wins.
                match ctx.response.take() {
                    Some(resp) => resp,
                    None => self.error_handler.handle(&err, &ctx),
                }
            }
        };

        let latency = start.elapsed();
        for middleware in ran.iter().rev() {
            middleware.after(&ctx, &mut response, latency);
        }
        response.set_header(REQUEST_ID_HEADER, request_id.to_string());
        response
    }

    /// Answer a request the transport could not parse, through the error handler.
    pub fn handle_transport_error(&self, err: &HttpError, method: &str, target: &str) -> HandlerResponse {
        let method = http::Method::from_bytes(method.as_bytes()).unwrap_or(http::Method::GET);
        let path = target.split('?').next().unwrap_or(target);
        let request = HttpRequest::new(method, path);
        let request_id = request.request_id;
        let ctx = RequestContext::new(request);
        let mut response = self.error_handler.handle(err, &ctx);
        response.set_header(REQUEST_ID_HEADER, request_id.to_string());
        response
    }

    /// Everything up to and including dispatch. `Ok(Some)` is a short-circuit response,
    /// `Ok(None)` means the response is in the context's slot.
    fn run(
        &self,
        ctx: &RequestContext,
        ran: &mut Vec<Arc<dyn Middleware>>,
    ) -> MiddlewareResult {
        if let Some(resp) = run_chain(&self.globals, ctx, ran)? {
            return Ok(Some(resp));
        }
        if ctx.response.is_sent() {
            return Ok(None);
        }

        let (method, path) = {
            let request = ctx.request.lock();
            (request.method.clone(), request.path.clone())
        };
        let Some(matched) = self.router.route(&method, &path) else {
            return Err(HttpError::not_found(format!("Cannot {method} {path}")));
        };
        debug!(
            method = %method,
            path = %path,
            handler = %matched.entry.handler_key,
            params = ?matched.params,
            "Route matched"
        );
        ctx.request.lock().params = matched.params;

        if let Some(resp) = run_chain(&matched.entry.chain, ctx, ran)? {
            return Ok(Some(resp));
        }
        if ctx.response.is_sent() {
            return Ok(None);
        }

        dispatch(&matched.entry, ctx)?;
        Ok(None)
    }

    /// Bind the transport to `addr` and start serving.
    ///
    /// Also applies the configured coroutine stack size to the `may` runtime.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        may::config().set_stack_size(self.config.stack_size);
        let prefix = self.config.api_prefix.clone();
        let handle = HttpServer(AppService::new(Arc::new(self))).start(addr)?;
        info!(
            url = %format!("http://{}{}", handle.addr(), crate::path::normalize(&prefix, "")),
            "Server ready"
        );
        Ok(handle)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.router.len())
            .field("middlewares", &self.globals.len())
            .field("api_prefix", &self.config.api_prefix)
            .finish()
    }
}

/// Run `before` for each middleware until one answers or the context holds a response.
fn run_chain(
    chain: &[Arc<dyn Middleware>],
    ctx: &RequestContext,
    ran: &mut Vec<Arc<dyn Middleware>>,
) -> MiddlewareResult {
    for middleware in chain {
        ran.push(Arc::clone(middleware));
        if let Some(resp) = middleware.before(ctx)? {
            debug!(middleware = middleware.name(), status = resp.status, "Middleware answered");
            return Ok(Some(resp));
        }
        if ctx.response.is_sent() {
            debug!(middleware = middleware.name(), "Middleware wrote the response");
            return Ok(None);
        }
    }
    Ok(None)
}
