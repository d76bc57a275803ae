//! Annotation processors. Each one records a single declarative marker in the store.

use std::sync::Arc;

use http::Method;
use tracing::debug;

use super::HandlerFactory;
use crate::auth::BaseRoute;
use crate::binder::ParamSource;
use crate::metadata::{keys, MetadataStore, RouteDescriptor, Subject};
use crate::middleware::Middleware;

/// Controller marker: record the path prefix and make sure a route list exists.
pub fn mark_controller(store: &mut MetadataStore, subject: Subject, prefix: &str) {
    store.define(subject, None, keys::PREFIX, prefix.to_string());
    store.get_or_insert_with(subject, None, keys::ROUTES, Vec::new);
}

/// Route marker: add a descriptor unless one with the same identity exists, and record the
/// member's handler. Returns `false` for a duplicate declaration.
pub fn mark_route(
    store: &mut MetadataStore,
    subject: Subject,
    method: Method,
    path: &str,
    handler_key: &str,
    handler: HandlerFactory,
) -> bool {
    store.define(subject, Some(handler_key), keys::HANDLER, handler);
    let routes = store.get_or_insert_with(subject, None, keys::ROUTES, Vec::new);
    if routes
        .iter()
        .any(|r| r.same_identity(&method, path, handler_key))
    {
        debug!(
            controller = subject.name(),
            method = %method,
            path = %path,
            handler = %handler_key,
            "Duplicate route declaration ignored"
        );
        return false;
    }
    routes.insert(0, RouteDescriptor::new(method, path, handler_key));
    true
}

/// Route-level middleware marker: attach `middleware` to one descriptor.
pub fn mark_route_middleware(
    store: &mut MetadataStore,
    subject: Subject,
    method: &Method,
    path: &str,
    handler_key: &str,
    middleware: Arc<dyn Middleware>,
) {
    let routes = store.get_or_insert_with(subject, None, keys::ROUTES, Vec::new);
    if let Some(route) = routes
        .iter_mut()
        .find(|r| r.same_identity(method, path, handler_key))
    {
        route.middlewares.push(middleware);
    }
}

/// Auth marker, at class level (`member == None`) or for one handler.
pub fn mark_auth(store: &mut MetadataStore, subject: Subject, member: Option<&str>) {
    store.define(subject, member, keys::AUTH, true);
}

/// Base-route auth overrides, appended to the controller's list.
pub fn mark_auth_for_routes(
    store: &mut MetadataStore,
    subject: Subject,
    routes: impl IntoIterator<Item = BaseRoute>,
) {
    store
        .get_or_insert_with(subject, None, keys::AUTH_FOR_BASE_ROUTE, Vec::new)
        .extend(routes);
}

/// Validation marker: the validator goes to the front of the member's marker chain.
pub fn mark_validation(
    store: &mut MetadataStore,
    subject: Subject,
    member: &str,
    validator: Arc<dyn Middleware>,
) {
    store
        .get_or_insert_with(subject, Some(member), keys::MIDDLEWARES, Vec::new)
        .insert(0, validator);
}

/// Upload marker: append the multipart middleware and bind the file parameter.
pub fn mark_upload(
    store: &mut MetadataStore,
    subject: Subject,
    member: &str,
    upload: Arc<dyn Middleware>,
    source: ParamSource,
    index: usize,
) {
    store
        .get_or_insert_with(subject, Some(member), keys::MIDDLEWARES, Vec::new)
        .push(upload);
    mark_param(store, subject, member, source, index);
}

/// Parameter marker: bind parameter `index` of `member` to `source`.
pub fn mark_param(
    store: &mut MetadataStore,
    subject: Subject,
    member: &str,
    source: ParamSource,
    index: usize,
) {
    let indices = store.get_or_insert_with(subject, Some(member), source.key(), Vec::new);
    if !indices.contains(&index) {
        indices.push(index);
    }
}

/// Status-code marker.
pub fn mark_http_code(store: &mut MetadataStore, subject: Subject, member: &str, code: u16) {
    store.define(subject, Some(member), keys::HTTP_CODE, code);
}

/// Shared middleware marker: runs for every route of the controller.
pub fn mark_shared_middleware(
    store: &mut MetadataStore,
    subject: Subject,
    middleware: Arc<dyn Middleware>,
) {
    store
        .get_or_insert_with(subject, None, keys::MIDDLEWARES, Vec::new)
        .push(middleware);
}

/// Record a problem found while processing a marker; registration fails on it.
pub fn record_declaration_error(
    store: &mut MetadataStore,
    subject: Subject,
    member: &str,
    message: String,
) {
    store
        .get_or_insert_with(subject, Some(member), keys::DECLARATION_ERRORS, Vec::new)
        .push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Arguments;
    use crate::dispatcher::{BoundHandler, Reply};
    use crate::error::HttpError;
    use crate::middleware::from_fn;

    struct Users;

    fn factory() -> HandlerFactory {
        Arc::new(|_| {
            let handler: BoundHandler = Arc::new(|_: Arguments| Ok::<_, HttpError>(Reply::Empty));
            Ok(handler)
        })
    }

    #[test]
    fn test_duplicate_route_is_ignored() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        assert!(mark_route(&mut store, users, Method::GET, "/", "list", factory()));
        assert!(!mark_route(&mut store, users, Method::GET, "/", "list", factory()));
        assert_eq!(store.controller(users).unwrap().routes.len(), 1);
    }

    #[test]
    fn test_routes_most_recent_first() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        mark_route(&mut store, users, Method::GET, "/", "list", factory());
        mark_route(&mut store, users, Method::POST, "/", "create", factory());
        let keys: Vec<_> = store
            .controller(users)
            .unwrap()
            .routes
            .iter()
            .map(|r| r.handler_key.as_str())
            .collect();
        assert_eq!(keys, ["create", "list"]);
    }

    #[test]
    fn test_validation_goes_to_front() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        mark_upload(
            &mut store,
            users,
            "create",
            from_fn("upload", |_| Ok(None)),
            ParamSource::SingleFile,
            1,
        );
        mark_validation(&mut store, users, "create", from_fn("validate", |_| Ok(None)));
        let names: Vec<_> = store
            .get(users, Some("create"), keys::MIDDLEWARES)
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, ["validate", "upload"]);
        assert_eq!(
            store.get(users, Some("create"), ParamSource::SingleFile.key()),
            Some(&vec![1])
        );
    }

    #[test]
    fn test_controller_marker_creates_route_list() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        mark_controller(&mut store, users, "/users");
        let view = store.controller(users).unwrap();
        assert_eq!(view.prefix, "/users");
        assert!(store.has(users, None, keys::ROUTES));
    }
}
