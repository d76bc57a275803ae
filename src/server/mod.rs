//! `may_minihttp` transport adapter.
//!
//! Converts wire requests into [`HttpRequest`](crate::context::HttpRequest)s, runs them
//! through the [`Application`](crate::app::Application) and writes the resulting
//! [`HandlerResponse`](crate::dispatcher::HandlerResponse) back.

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{build_request, parse_body, parse_cookies, parse_query_params, parse_request};
pub use response::{encode_body, header_lines, MAX_RESPONSE_HEADERS};
pub use service::AppService;
