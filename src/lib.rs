//! # routemark
//!
//! **routemark** turns declarative controller annotations into an ordered route table and a
//! per-request pipeline, served on `may` coroutines through `may_minihttp`.
//!
//! ## Overview
//!
//! A controller is a plain struct whose handlers are declared once, either with the
//! [`controller`] attribute macro or by implementing [`Controller`] by hand. Declarations are
//! recorded as markers in a [`MetadataStore`]. [`ServerBuilder::build`] then runs the
//! registration pass: every controller instance is resolved from the [`Container`], paths are
//! joined and normalized, the auth requirement of each route is resolved, middleware chains
//! are composed, and the result is a [`Router`] used by the [`Application`].
//!
//! ## Architecture
//!
//! - **[`metadata`]** - type-keyed store of declared markers
//! - **[`annotations`]** - the [`Controller`] trait, declaration builder and marker processors
//! - **[`path`]**, **[`auth`]**, **[`binder`]** - path normalization, auth resolution and
//!   handler argument binding
//! - **[`middleware`]** - the middleware trait, chain composition and built-in middlewares
//!   (validation, uploads, guards, CORS, request logging)
//! - **[`dispatcher`]** - handler invocation and the response envelope
//! - **[`registration`]**, **[`router`]** - the registration pass and route matching
//! - **[`app`]** - [`ServerBuilder`] and the request pipeline
//! - **[`server`]** - the `may_minihttp` transport adapter
//! - **[`config`]**, **[`logging`]** - YAML/env configuration and tracing setup
//!
//! ## Example
//!
//! ```
//! use routemark::{controller, Json, ServerBuilder, ServerConfig};
//! use serde_json::{json, Value};
//!
//! #[derive(Default)]
//! struct Users;
//!
//! #[controller("/users")]
//! impl Users {
//!     #[get("/:id")]
//!     fn get_one(&self, #[params] params: Value) -> Value {
//!         json!({ "id": params["id"] })
//!     }
//!
//!     #[post("/")]
//!     #[authorized]
//!     #[http_code(201)]
//!     fn create(&self, #[body] body: Json<Value>) -> Value {
//!         body.into_inner()
//!     }
//! }
//!
//! let app = ServerBuilder::new(ServerConfig::default())
//!     .controller_default::<Users>()
//!     .build()
//!     .unwrap();
//! assert_eq!(app.routes().len(), 2);
//! ```

extern crate self as routemark;

pub mod annotations;
pub mod app;
pub mod auth;
pub mod binder;
pub mod config;
pub mod container;
pub mod context;
pub mod crud;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod ids;
pub mod logging;
pub mod metadata;
pub mod middleware;
pub mod path;
pub mod registration;
pub mod router;
pub mod server;

pub use annotations::{Controller, ControllerDef, RouteDef};
pub use app::{Application, ServerBuilder, REQUEST_ID_HEADER};
pub use auth::BaseRoute;
pub use binder::{Argument, Arguments, FromArgument, Json, ParamSource};
pub use config::ServerConfig;
pub use container::{Container, Resolver};
pub use context::{HttpRequest, RequestContext, RequestHandle, ResponseHandle, UploadedFile};
pub use crud::CrudRoute;
pub use dispatcher::{Deferred, HandlerResponse, IntoReply, Reply};
pub use error::{DefaultErrorHandler, ErrorHandler, HttpError, RegistrationError};
pub use ids::RequestId;
pub use metadata::{MetadataStore, Subject};
pub use middleware::{Middleware, MiddlewareResult};
pub use router::Router;
pub use routemark_macros::controller;
pub use server::ServerHandle;

#[doc(hidden)]
pub mod __private {
    pub use http::Method;
}
