//! Middlewares and per-route chain composition.
//!
//! A middleware's `before` hook either continues, answers the request, or fails with an
//! [`HttpError`](crate::error::HttpError). `after` hooks run in reverse order for every
//! middleware whose `before` ran.

mod compose;
mod core;
mod cors;
mod guard;
mod logging;
mod upload;
mod validate;

pub use compose::compose;
pub use core::{from_fn, FnMiddleware, Middleware, MiddlewareResult};
pub use cors::CorsMiddleware;
pub use guard::{RequireUser, TokenAuth};
pub use logging::RequestLogger;
pub use upload::{UploadMiddleware, UploadMode};
pub use validate::{validation_failed, FieldError, Validate, ValidateBody};
