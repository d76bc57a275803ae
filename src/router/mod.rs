//! # Router Module
//!
//! Path matching for the registered route table.
//!
//! Route paths are compiled at registration into anchored regexes: `/users/:id` and
//! `/users/{id}` both become `^/users/([^/]+)/?$` with the parameter name `id`. At request
//! time the router tests the routes of the request method in specificity order and returns the
//! first match with its decoded path parameters.
//!
//! ```rust,ignore
//! let m = router.route(&Method::GET, "/api/users/42").unwrap();
//! assert_eq!(m.params["id"], "42");
//! ```

mod core;

pub use core::{RouteEntry, RouteMatch, Router};
