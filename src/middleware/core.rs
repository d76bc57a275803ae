use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::dispatcher::HandlerResponse;
use crate::error::HttpError;

/// Outcome of [`Middleware::before`].
///
/// `Ok(None)` continues the chain, `Ok(Some(resp))` answers the request without running
/// anything further, `Err(e)` forwards `e` to the error handler.
pub type MiddlewareResult = Result<Option<HandlerResponse>, HttpError>;

pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before(&self, _ctx: &RequestContext) -> MiddlewareResult {
        Ok(None)
    }

    /// Runs for every middleware whose `before` ran, in reverse order, once the response is
    /// known.
    fn after(&self, _ctx: &RequestContext, _res: &mut HandlerResponse, _latency: Duration) {}
}

impl Middleware for Arc<dyn Middleware> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        (**self).before(ctx)
    }

    fn after(&self, ctx: &RequestContext, res: &mut HandlerResponse, latency: Duration) {
        (**self).after(ctx, res, latency);
    }
}

/// Middleware built from a closure over `before`.
pub struct FnMiddleware<F> {
    name: &'static str,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&RequestContext) -> MiddlewareResult + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        (self.f)(ctx)
    }
}

/// Wrap a closure as a middleware.
///
/// ```
/// use routemark::middleware::{from_fn, Middleware};
///
/// let noop = from_fn("noop", |_ctx| Ok(None));
/// assert_eq!(noop.name(), "noop");
/// ```
pub fn from_fn<F>(name: &'static str, f: F) -> Arc<dyn Middleware>
where
    F: Fn(&RequestContext) -> MiddlewareResult + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { name, f })
}
