//! The registration pass: declared metadata in, route table out.
//!
//! Runs once, single-threaded, before the transport starts. Any inconsistency in the declared
//! metadata aborts the pass with a [`RegistrationError`]; nothing is half-registered.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::requires_auth;
use crate::binder::ParamBindings;
use crate::container::Resolver;
use crate::error::RegistrationError;
use crate::metadata::{keys, MetadataStore};
use crate::middleware::{compose, Middleware};
use crate::path::normalize;
use crate::router::{RouteEntry, Router};

/// Build the route table for every declared controller.
///
/// Each controller instance is resolved once and shared by all of its routes. Route paths are
/// `api_prefix + controller prefix + route path`, each join going through [`normalize`].
pub fn register(
    store: &MetadataStore,
    resolver: &dyn Resolver,
    guard: Option<&Arc<dyn Middleware>>,
    api_prefix: &str,
) -> Result<Router, RegistrationError> {
    let mut router = Router::new();

    for &subject in store.controllers() {
        let Some(controller) = store.controller(subject) else {
            continue;
        };
        if controller.routes.is_empty() {
            debug!(controller = subject.name(), "Controller declares no routes");
            continue;
        }

        let instance = resolver.resolve(subject)?;
        let shared = store
            .get(subject, None, keys::MIDDLEWARES)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for route in controller.routes {
            let key = route.handler_key.as_str();

            if let Some(message) = store
                .get(subject, Some(key), keys::DECLARATION_ERRORS)
                .and_then(|errors| errors.first())
            {
                return Err(RegistrationError::InvalidSchema {
                    controller: subject.name(),
                    handler: key.to_string(),
                    message: message.clone(),
                });
            }

            let factory = store.get(subject, Some(key), keys::HANDLER).ok_or_else(|| {
                RegistrationError::MissingHandler {
                    controller: subject.name(),
                    handler: key.to_string(),
                    method: route.method.clone(),
                    path: route.raw_path.clone(),
                }
            })?;
            let handler = factory(Arc::clone(&instance))?;

            let method_flag = store
                .get(subject, Some(key), keys::AUTH)
                .copied()
                .unwrap_or(false);
            let auth = requires_auth(&controller, route, method_flag);
            if auth && guard.is_none() {
                warn!(
                    controller = subject.name(),
                    handler = %key,
                    "Route requires auth but no guard is configured"
                );
            }

            let bindings = ParamBindings::collect(store, subject, key)?;
            let markers = store
                .get(subject, Some(key), keys::MIDDLEWARES)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let chain = compose(guard, auth, shared, markers, &route.middlewares);
            let status_code = store
                .get(subject, Some(key), keys::HTTP_CODE)
                .copied()
                .unwrap_or(200);
            let path = normalize(api_prefix, &normalize(controller.prefix, &route.raw_path));

            let chain_names: Vec<String> = chain.iter().map(|m| m.name().to_string()).collect();
            let entry = RouteEntry {
                method: route.method.clone(),
                path,
                subject,
                handler_key: key.to_string(),
                requires_auth: auth,
                chain,
                bindings,
                status_code,
                handler,
            };
            let (method, path) = (entry.method.clone(), entry.path.clone());
            if router.insert(entry)? {
                info!(
                    method = %method,
                    path = %path,
                    controller = subject.name(),
                    handler = %key,
                    requires_auth = auth,
                    chain = ?chain_names,
                    "Route registered"
                );
            }
        }
    }

    router.log_routes();
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{Controller, ControllerDef};
    use crate::binder::Arguments;
    use crate::container::Container;
    use crate::middleware::{from_fn, RequireUser};
    use http::Method;
    use serde_json::json;

    #[derive(Default)]
    struct Users;

    impl Controller for Users {
        fn describe(def: &mut ControllerDef<'_, Self>) {
            def.prefix("users")
                .auth_for_routes([crate::auth::BaseRoute::new(Method::POST, "")]);
            def.get("", "list", |_: &Users, _: Arguments| json!([]));
            def.post("", "create", |_: &Users, _: Arguments| ())
                .validate_schema(&json!({ "type": "object" }))
                .body(0);
        }
    }

    struct Broken;

    impl Controller for Broken {
        fn describe(def: &mut ControllerDef<'_, Self>) {
            def.post("", "create", |_: &Broken, _: Arguments| ())
                .body(0)
                .query(0);
        }
    }

    fn container() -> Container {
        let mut c = Container::new();
        c.register_default::<Users>();
        c
    }

    #[test]
    fn test_paths_auth_and_chain() {
        let mut store = MetadataStore::new();
        store.declare::<Users>();
        let guard: Arc<dyn Middleware> = Arc::new(RequireUser);
        let router = register(&store, &container(), Some(&guard), "/api").unwrap();

        let list = router.route(&Method::GET, "/api/users").unwrap().entry;
        assert!(!list.requires_auth);
        assert!(list.chain.is_empty());

        let create = router.route(&Method::POST, "/api/users").unwrap().entry;
        assert!(create.requires_auth);
        let names: Vec<_> = create.chain.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["RequireUser", "ValidateBody<schema>"]);
    }

    #[test]
    fn test_unresolved_controller_fails() {
        let mut store = MetadataStore::new();
        store.declare::<Users>();
        let err = register(&store, &Container::new(), None, "/api").unwrap_err();
        assert!(matches!(err, RegistrationError::UnresolvedController { .. }));
    }

    #[test]
    fn test_conflicting_sources_fail() {
        let mut store = MetadataStore::new();
        store.declare::<Broken>();
        let mut c = Container::new();
        c.register_instance(Broken);
        let err = register(&store, &c, None, "/").unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::ConflictingParameterSource { index: 0, .. }
        ));
    }

    #[test]
    fn test_route_level_middleware_runs_last() {
        struct Items;
        impl Controller for Items {
            fn describe(def: &mut ControllerDef<'_, Self>) {
                def.use_middleware(RequireUser);
                def.get("", "list", |_: &Items, _: Arguments| ())
                    .middleware(crate::middleware::CorsMiddleware::default());
            }
        }
        let mut store = MetadataStore::new();
        store.declare::<Items>();
        let mut c = Container::new();
        c.register_instance(Items);
        let unused_guard = from_fn("guard", |_| Ok(None));
        let router = register(&store, &c, Some(&unused_guard), "/api").unwrap();
        let entry = router.route(&Method::GET, "/api").unwrap().entry;
        let names: Vec<_> = entry.chain.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["RequireUser", "Cors"]);
    }
}
