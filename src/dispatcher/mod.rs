//! # Dispatcher Module
//!
//! Invokes the handler bound to a matched route and turns its result into exactly one
//! response.
//!
//! ## Results
//!
//! Handlers return anything implementing [`IntoReply`]:
//!
//! - `()`, `None` or `Value::Null` produce `{ "data": null, "statusCode": 200 }`
//! - JSON values, strings, scalars and [`Json<T>`](crate::binder::Json) are wrapped as
//!   `{ "data": <value>, "statusCode": <code> }`, where the code comes from `http_code` or 200
//! - a [`HandlerResponse`] is written unchanged
//! - a [`Deferred`] is joined first, then treated like any other result
//! - `Err(e)` is forwarded to the error handler
//!
//! ## Error Handling
//!
//! Handler panics are caught and reported as 500 errors; they never take down the serving
//! coroutine.

mod core;

pub use core::{
    dispatch, BoundHandler, Deferred, HandlerResponse, HeaderVec, IntoReply, Reply,
    MAX_INLINE_HEADERS,
};
