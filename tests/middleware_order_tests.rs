//! Composition order of framework, guard, shared, marker and route-level middlewares.

mod common;

use std::time::Duration;

use common::{assert_status, get, post_json};
use http::Method;
use parking_lot::Mutex;
use routemark::middleware::{CorsMiddleware, RequireUser, TokenAuth};
use routemark::{
    Arguments, Controller, ControllerDef, HandlerResponse, HttpRequest, Middleware,
    MiddlewareResult, RequestContext, ServerBuilder, ServerConfig,
};
use serde_json::json;

/// Shared by every recorder; tests holding `SERIAL` own it.
static LOG: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

fn record(entry: impl Into<String>) {
    LOG.lock().push(entry.into());
}

/// Serialize the test and start from an empty log.
fn fresh_log() -> parking_lot::MutexGuard<'static, ()> {
    let guard = SERIAL.lock();
    LOG.lock().clear();
    guard
}

fn recorded() -> Vec<String> {
    LOG.lock().clone()
}

struct Recorder(&'static str);

impl Middleware for Recorder {
    fn name(&self) -> &str {
        self.0
    }

    fn before(&self, _ctx: &RequestContext) -> MiddlewareResult {
        record(format!("before:{}", self.0));
        Ok(None)
    }

    fn after(&self, _ctx: &RequestContext, _res: &mut HandlerResponse, _latency: Duration) {
        record(format!("after:{}", self.0));
    }
}

#[derive(Default)]
struct Orders;

impl Controller for Orders {
    fn describe(def: &mut ControllerDef<'_, Self>) {
        def.prefix("orders");
        def.post("", "create", |_: &Orders, _: Arguments| {
            record("handler");
            json!({ "ok": true })
        })
        .authorized()
        .validate_schema(&json!({ "type": "object", "required": ["sku"] }));
        def.get("", "list", |_: &Orders, _: Arguments| {
            record("handler");
            json!([])
        });
    }
}

#[derive(Default)]
struct Traced;

impl Controller for Traced {
    fn describe(def: &mut ControllerDef<'_, Self>) {
        def.prefix("traced");
        def.use_middleware(Recorder("shared"));
        def.get("", "list", |_: &Traced, _: Arguments| record("handler"))
            .middleware(Recorder("route"));
    }
}

fn app() -> routemark::Application {
    ServerBuilder::new(ServerConfig::default())
        .use_middleware(Recorder("global"))
        .protect_routes(Recorder("guard"))
        .controller_default::<Orders>()
        .controller_default::<Traced>()
        .build()
        .unwrap()
}

#[test]
fn chain_runs_in_composition_order_and_unwinds_in_reverse() {
    let _serial = fresh_log();
    let resp = app().handle(get("/api/traced"));
    assert_status(&resp, 200);
    assert_eq!(
        recorded(),
        [
            "before:global",
            "before:shared",
            "before:route",
            "handler",
            "after:route",
            "after:shared",
            "after:global",
        ]
    );
}

#[test]
fn guard_runs_before_validation() {
    let _serial = fresh_log();
    let resp = app().handle(post_json("/api/orders", json!({})));
    // The recording guard lets the request through, so validation answers.
    assert_status(&resp, 400);
    assert_eq!(
        recorded(),
        ["before:global", "before:guard", "after:guard", "after:global"]
    );
}

#[test]
fn public_routes_skip_the_guard() {
    let _serial = fresh_log();
    let resp = app().handle(get("/api/orders"));
    assert_status(&resp, 200);
    assert_eq!(recorded(), ["before:global", "handler", "after:global"]);
}

#[test]
fn rejecting_guard_short_circuits_validation() {
    #[derive(Default)]
    struct Secure;
    impl Controller for Secure {
        fn describe(def: &mut ControllerDef<'_, Self>) {
            def.post("", "create", |_: &Secure, _: Arguments| ())
                .authorized()
                .validate_schema(&json!({ "type": "object", "required": ["sku"] }));
        }
    }
    let app = ServerBuilder::new(ServerConfig::default())
        .protect_routes(RequireUser)
        .controller_default::<Secure>()
        .build()
        .unwrap();
    let resp = app.handle(post_json("/api", json!({})));
    assert_status(&resp, 401);
    assert_eq!(resp.body, json!({ "statusCode": 401, "message": "Unauthorized" }));
}

#[test]
fn token_auth_then_guard() {
    #[derive(Default)]
    struct Me;
    impl Controller for Me {
        fn describe(def: &mut ControllerDef<'_, Self>) {
            def.prefix("me").authorized();
            def.get("", "me", |_: &Me, mut args: Arguments| {
                let req: routemark::RequestHandle = args.extract(0)?;
                Ok::<_, routemark::HttpError>(req.user())
            })
            .request(0);
        }
    }
    let app = ServerBuilder::new(ServerConfig::default())
        .use_middleware(TokenAuth::new("s3cret", json!({ "id": 1 })))
        .protect_routes(RequireUser)
        .controller_default::<Me>()
        .build()
        .unwrap();

    assert_status(&app.handle(get("/api/me")), 401);
    let wrong = get("/api/me").with_header("Authorization", "Bearer nope");
    assert_status(&app.handle(wrong), 401);
    let ok = app.handle(get("/api/me").with_header("Authorization", "Bearer s3cret"));
    assert_eq!(ok.body, json!({ "data": { "id": 1 }, "statusCode": 200 }));
}

#[test]
fn cors_preflight_and_headers() {
    #[derive(Default)]
    struct Ping;
    impl Controller for Ping {
        fn describe(def: &mut ControllerDef<'_, Self>) {
            def.get("ping", "ping", |_: &Ping, _: Arguments| "pong");
        }
    }
    let app = ServerBuilder::new(ServerConfig::default())
        .enable_cors(CorsMiddleware::new(
            vec!["https://app.example".to_string()],
            vec!["Content-Type".to_string()],
            vec![Method::GET],
        ))
        .controller_default::<Ping>()
        .build()
        .unwrap();

    let preflight = HttpRequest::new(Method::OPTIONS, "/api/anything")
        .with_header("Origin", "https://app.example");
    let resp = app.handle(preflight);
    assert_status(&resp, 204);
    assert_eq!(
        resp.get_header("access-control-allow-origin"),
        Some("https://app.example")
    );

    let resp = app.handle(get("/api/ping").with_header("Origin", "https://evil.example"));
    assert_status(&resp, 200);
    assert!(resp.get_header("access-control-allow-origin").is_none());
}
