//! Per-route auth requirement.
//!
//! A route needs the guard when any of three sources says so: the controller's class-level
//! marker, the handler's own marker, or a base-route override naming the route's method and
//! path. Overrides are compared after both sides went through [`normalize`] with the
//! controller prefix.

use crate::crud::CrudRoute;
use crate::metadata::{ControllerDescriptor, RouteDescriptor};
use crate::path::normalize;
use http::Method;

/// A `{ method, path }` pair named by a base-route auth override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseRoute {
    pub method: Method,
    pub path: String,
}

impl BaseRoute {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl From<CrudRoute> for BaseRoute {
    fn from(route: CrudRoute) -> Self {
        BaseRoute::new(route.method(), route.path())
    }
}

/// Whether `route` of `controller` must pass the guard.
#[must_use]
pub fn requires_auth(
    controller: &ControllerDescriptor<'_>,
    route: &RouteDescriptor,
    method_flag: bool,
) -> bool {
    if controller.class_auth_required || method_flag {
        return true;
    }
    if controller.base_route_overrides.is_empty() {
        return false;
    }
    let resolved = normalize(controller.prefix, &route.raw_path);
    controller
        .base_route_overrides
        .iter()
        .any(|o| o.method == route.method && normalize(controller.prefix, &o.path) == resolved)
}
