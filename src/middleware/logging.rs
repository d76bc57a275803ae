use std::time::Duration;

use tracing::{info, warn};

use super::Middleware;
use crate::context::RequestContext;
use crate::dispatcher::HandlerResponse;

/// Logs one line per completed request.
///
/// Install it first among the framework-level middlewares so its `after` hook runs last and
/// sees the final status.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "RequestLogger"
    }

    fn after(&self, ctx: &RequestContext, res: &mut HandlerResponse, latency: Duration) {
        let request = ctx.request.lock();
        let latency_ms = latency.as_millis() as u64;
        if res.status >= 500 {
            warn!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                status = res.status,
                latency_ms = latency_ms,
                "Request completed with server error"
            );
        } else {
            info!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                status = res.status,
                latency_ms = latency_ms,
                "Request completed"
            );
        }
    }
}
