//! Per-request state shared by middlewares, the binder and handlers.

use crate::dispatcher::HandlerResponse;
use crate::ids::RequestId;
use http::Method;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A file extracted from a `multipart/form-data` body by the upload middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
}

impl UploadedFile {
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// The transport-independent view of an incoming request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub request_id: RequestId,
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: Map<String, Value>,
    /// Path parameters, filled in once a route has matched.
    pub params: Map<String, Value>,
    /// Parsed JSON or form body; `Null` when the request had none.
    pub body: Value,
    /// Unparsed body bytes, kept for body-consuming middlewares such as uploads.
    pub raw_body: Vec<u8>,
    pub file: Option<UploadedFile>,
    pub files: Option<Vec<UploadedFile>>,
    /// Identity attached by an authentication middleware; checked by guards.
    pub user: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            query: Map::new(),
            params: Map::new(),
            body: Value::Null,
            raw_body: Vec::new(),
            file: None,
            files: None,
            user: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query
            .insert(name.to_string(), Value::String(value.into()));
        self
    }

    /// Set a JSON body; the raw bytes are kept in sync.
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.raw_body = body.to_string().into_bytes();
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = body;
        self
    }

    /// Set raw body bytes and their content type without parsing them.
    #[must_use]
    pub fn with_raw_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.raw_body = body;
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Live, shared handle to the request. Changes made through it are visible to every later
/// middleware and to the handler.
#[derive(Debug, Clone)]
pub struct RequestHandle(Arc<Mutex<HttpRequest>>);

impl RequestHandle {
    pub fn lock(&self) -> MutexGuard<'_, HttpRequest> {
        self.0.lock()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock().header(name).map(str::to_string)
    }

    #[must_use]
    pub fn user(&self) -> Option<Value> {
        self.lock().user.clone()
    }

    pub fn set_user(&self, user: Value) {
        self.lock().user = Some(user);
    }
}

/// Live, shared handle to the response slot of a request.
///
/// At most one response is accepted; later writes are dropped with a warning so an exchange is
/// never answered twice.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle(Arc<Mutex<Option<HandlerResponse>>>);

impl ResponseHandle {
    /// Store `response` unless one has already been written. Returns whether it was stored.
    pub fn send(&self, response: HandlerResponse) -> bool {
        let mut slot = self.0.lock();
        if slot.is_some() {
            warn!(status = response.status, "Response already sent - dropping second write");
            return false;
        }
        *slot = Some(response);
        true
    }

    pub fn json(&self, status: u16, body: Value) -> bool {
        self.send(HandlerResponse::json(status, body))
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.0.lock().is_some()
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.0.lock().as_ref().map(|r| r.status)
    }

    pub(crate) fn take(&self) -> Option<HandlerResponse> {
        self.0.lock().take()
    }
}

/// Request and response of one exchange.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: RequestHandle,
    pub response: ResponseHandle,
}

impl RequestContext {
    #[must_use]
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request: RequestHandle(Arc::new(Mutex::new(request))),
            response: ResponseHandle::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_handle_accepts_one_write() {
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/"));
        assert!(ctx.response.json(201, json!({})));
        assert!(!ctx.response.json(500, json!({})));
        assert_eq!(ctx.response.status(), Some(201));
    }

    #[test]
    fn test_request_handle_is_live() {
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/"));
        let handle = ctx.request.clone();
        handle.set_user(json!({ "id": 7 }));
        assert_eq!(ctx.request.user(), Some(json!({ "id": 7 })));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = HttpRequest::new(Method::GET, "/").with_header("X-Trace-Id", "abc");
        assert_eq!(req.header("x-trace-id"), Some("abc"));
        assert_eq!(req.header("X-TRACE-ID"), Some("abc"));
    }
}
