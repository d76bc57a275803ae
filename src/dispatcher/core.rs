//! Dispatcher core: handler results, response envelopes and the per-route invocation.

use crate::binder::{bind, Arguments, Json};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::router::RouteEntry;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for responses.
///
/// Header names use `Arc<str>`; values are per-response data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// A handler bound to its controller instance.
pub type BoundHandler = Arc<dyn Fn(Arguments) -> Result<Reply, HttpError> + Send + Sync>;

/// Response produced by the pipeline and written by the transport adapter.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// Response body as JSON; `Null` writes an empty body
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a JSON response with default headers
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response without a body.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderVec::new(), Value::Null)
    }

    /// The success envelope `{ "data": .., "statusCode": .. }`.
    #[must_use]
    pub fn envelope(status: u16, data: Value) -> Self {
        Self::json(status, json!({ "data": data, "statusCode": status }))
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or update a header
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }
}

/// A handler computation running on its own coroutine.
///
/// Returned by handlers that need to suspend; the dispatcher joins it before writing the
/// response.
pub struct Deferred(may::coroutine::JoinHandle<Result<Reply, HttpError>>);

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Deferred(..)")
    }
}

impl Deferred {
    /// Run `f` on a new coroutine.
    pub fn spawn<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        Deferred(may::go!(move || f().into_reply()))
    }

    /// Wait for the computation; a panic inside it becomes a 500.
    fn join(self) -> Result<Reply, HttpError> {
        match self.0.join() {
            Ok(result) => result,
            Err(panic) => Err(HttpError::internal(panic_message(panic.as_ref()))),
        }
    }
}

/// What a handler produced.
#[derive(Debug)]
pub enum Reply {
    /// Wrapped into the success envelope.
    Value(Value),
    /// Wrapped into the success envelope with `data: null`.
    Empty,
    /// Written as-is, without the envelope.
    Raw(HandlerResponse),
    /// Settled by the dispatcher before the response is written.
    Deferred(Deferred),
}

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, HttpError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(Reply::Empty)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(match self {
            Value::Null => Reply::Empty,
            other => Reply::Value(other),
        })
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(Reply::Value(Value::String(self)))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(Reply::Value(Value::String(self.to_string())))
    }
}

macro_rules! scalar_reply {
    ($($t:ty),*) => {
        $(impl IntoReply for $t {
            fn into_reply(self) -> Result<Reply, HttpError> {
                Ok(Reply::Value(json!(self)))
            }
        })*
    };
}

scalar_reply!(bool, i32, i64, u32, u64, f64);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, HttpError> {
        serde_json::to_value(self.0)?.into_reply()
    }
}

impl IntoReply for HandlerResponse {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(Reply::Raw(self))
    }
}

impl IntoReply for Deferred {
    fn into_reply(self) -> Result<Reply, HttpError> {
        Ok(Reply::Deferred(self))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, HttpError> {
        match self {
            Some(inner) => inner.into_reply(),
            None => Ok(Reply::Empty),
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HttpError>,
{
    fn into_reply(self) -> Result<Reply, HttpError> {
        match self {
            Ok(inner) => inner.into_reply(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Invoke the route's handler and write its result into the context's response slot.
///
/// Arguments are bound from the context, the handler runs with panic recovery, deferred
/// results are joined, and anything that is not a raw response is wrapped into the success
/// envelope with the declared status code (200 by default). Nothing is written when the
/// handler already answered through its `Response` handle. Errors are returned unchanged for
/// the error handler.
pub fn dispatch(route: &RouteEntry, ctx: &RequestContext) -> Result<(), HttpError> {
    let request_id = ctx.request.lock().request_id;
    let args = bind(ctx, &route.bindings);

    // D1: Handler execution start
    info!(
        request_id = %request_id,
        controller = route.subject.name(),
        handler = %route.handler_key,
        method = %route.method,
        path = %route.path,
        "Handler execution start"
    );
    let start = Instant::now();

    let outcome = match catch_unwind(AssertUnwindSafe(|| (route.handler)(args))) {
        Ok(result) => result,
        Err(panic) => {
            // D2: Handler panic caught
            let message = panic_message(panic.as_ref());
            error!(
                request_id = %request_id,
                handler = %route.handler_key,
                panic_message = %message,
                "Handler panicked - CRITICAL"
            );
            Err(HttpError::internal(message))
        }
    };

    let reply = settle(outcome);
    let latency_ms = start.elapsed().as_millis() as u64;
    let reply = match reply {
        Ok(reply) => reply,
        Err(err) => {
            // D3: Handler failed
            debug!(
                request_id = %request_id,
                handler = %route.handler_key,
                status = err.status,
                latency_ms = latency_ms,
                "Handler returned error"
            );
            return Err(err);
        }
    };

    if ctx.response.is_sent() {
        // D4: Handler wrote its own response
        debug!(
            request_id = %request_id,
            handler = %route.handler_key,
            "Response already sent by handler"
        );
        return Ok(());
    }

    let response = match reply {
        Reply::Raw(resp) => resp,
        Reply::Value(data) => HandlerResponse::envelope(route.status_code, data),
        Reply::Empty => HandlerResponse::envelope(route.status_code, Value::Null),
        Reply::Deferred(_) => return Err(HttpError::internal("unsettled deferred reply")),
    };

    // D5: Handler execution complete
    info!(
        request_id = %request_id,
        handler = %route.handler_key,
        status = response.status,
        latency_ms = latency_ms,
        "Handler execution complete"
    );
    ctx.response.send(response);
    Ok(())
}

/// Join deferred replies until a settled one remains.
fn settle(mut outcome: Result<Reply, HttpError>) -> Result<Reply, HttpError> {
    loop {
        match outcome {
            Ok(Reply::Deferred(deferred)) => outcome = deferred.join(),
            other => return other,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {s}")
    } else {
        "Handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_value_is_empty_reply() {
        assert!(matches!(Value::Null.into_reply(), Ok(Reply::Empty)));
        assert!(matches!(None::<Value>.into_reply(), Ok(Reply::Empty)));
    }

    #[test]
    fn test_result_error_is_propagated() {
        let result: Result<Value, HttpError> = Err(HttpError::bad_request("nope"));
        let err = result.into_reply().unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_settle_joins_deferred() {
        let reply = settle(Deferred::spawn(|| json!({ "late": true })).into_reply()).unwrap();
        match reply {
            Reply::Value(v) => assert_eq!(v, json!({ "late": true })),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut resp = HandlerResponse::json(200, Value::Null);
        resp.set_header("Content-Type", "text/plain".to_string());
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(resp.get_header("content-type"), Some("text/plain"));
    }
}
