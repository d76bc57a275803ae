//! Error types and the error-handling collaborator.
//!
//! Three kinds of failure exist:
//!
//! - [`HttpError`]: raised by handlers, guards and argument extraction. Never converted to a
//!   response locally; the [`Application`](crate::app::Application) hands it to the configured
//!   [`ErrorHandler`], which is the only place that picks the final status and message.
//! - Validation failures: answered in place by the validation middleware with a 400 envelope.
//! - [`RegistrationError`]: fatal startup errors. `ServerBuilder::build` returns them instead of
//!   skipping the offending controller.

use crate::binder::ParamSource;
use crate::context::RequestContext;
use crate::dispatcher::HandlerResponse;
use http::StatusCode;
use serde_json::json;
use std::error::Error as StdError;
use thiserror::Error;
use tracing::{error, warn};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Canonical reason phrase for a status code (`"Internal Server Error"` for unknown codes).
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Internal Server Error")
}

/// An error carrying the HTTP status it should be reported with.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    /// Create an error; without a message the reason phrase of `status` is used.
    pub fn new(status: u16, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| reason_phrase(status).to_string());
        Self {
            status,
            message,
            source: None,
        }
    }

    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::new(status, None)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, Some(message.into()))
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::status(401)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, Some(message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, Some(message.into()))
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        HttpError::internal(message).with_source(err)
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::internal(err.to_string()).with_source(err)
    }
}

/// Fatal errors raised while turning declared metadata into the route table.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("controller `{controller}` is not registered with the container")]
    UnresolvedController { controller: &'static str },

    #[error("container returned an instance of the wrong type for `{controller}`")]
    InstanceTypeMismatch { controller: &'static str },

    #[error("route `{method} {path}` on `{controller}` has no handler for `{handler}`")]
    MissingHandler {
        controller: &'static str,
        handler: String,
        method: http::Method,
        path: String,
    },

    #[error(
        "parameter {index} of `{controller}::{handler}` is bound to both {first:?} and {second:?}"
    )]
    ConflictingParameterSource {
        controller: &'static str,
        handler: String,
        index: usize,
        first: ParamSource,
        second: ParamSource,
    },

    #[error("invalid route pattern `{path}`: {reason}")]
    InvalidRoutePattern { path: String, reason: String },

    #[error("invalid body schema for `{controller}::{handler}`: {message}")]
    InvalidSchema {
        controller: &'static str,
        handler: String,
        message: String,
    },

    #[error("failed to construct `{controller}`: {message}")]
    Construction {
        controller: &'static str,
        message: String,
    },
}

/// Turns an [`HttpError`] forwarded by the pipeline into exactly one response.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &HttpError, ctx: &RequestContext) -> HandlerResponse;
}

/// Responds with `{ "statusCode": <status>, "message": <message> }`.
///
/// In production mode the message is replaced by the reason phrase of the status so internal
/// details never leave the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler {
    production: bool,
}

impl DefaultErrorHandler {
    #[must_use]
    pub fn new(production: bool) -> Self {
        Self { production }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, err: &HttpError, ctx: &RequestContext) -> HandlerResponse {
        let status = if (100..=999).contains(&err.status) {
            err.status
        } else {
            500
        };
        let message = if self.production || err.message.is_empty() {
            reason_phrase(status).to_string()
        } else {
            err.message.clone()
        };

        let request = ctx.request.lock();
        if status >= 500 {
            error!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                status = status,
                error = %err,
                source = ?err.source(),
                "Request failed"
            );
        } else {
            warn!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                status = status,
                error = %err,
                "Request rejected"
            );
        }

        HandlerResponse::json(status, json!({ "statusCode": status, "message": message }))
    }
}
