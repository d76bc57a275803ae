//! Demo controllers served by the `routemark-demo` binary.

use serde_json::{json, Value};

use crate::annotations::{Controller, ControllerDef};
use crate::binder::Arguments;
use crate::context::RequestHandle;
use crate::error::HttpError;

/// Echoes the request back.
#[derive(Debug, Default)]
pub struct EchoController;

impl EchoController {
    fn echo(&self, req: &RequestHandle) -> Value {
        let req = req.lock();
        json!({
            "method": req.method.to_string(),
            "path": req.path,
            "params": req.params,
            "query": req.query,
            "body": req.body,
            "user": req.user,
        })
    }
}

impl Controller for EchoController {
    fn describe(def: &mut ControllerDef<'_, Self>) {
        def.prefix("echo");
        def.get("/:id", "echo_one", |c: &EchoController, mut args: Arguments| {
            let req = args.extract::<RequestHandle>(0)?;
            Ok::<_, HttpError>(c.echo(&req))
        })
        .request(0);
        def.post("", "echo_body", |_: &EchoController, mut args: Arguments| {
            args.extract::<Value>(0)
        })
        .body(0)
        .http_code(201);
        def.get("/private", "echo_private", |c: &EchoController, mut args: Arguments| {
            let req = args.extract::<RequestHandle>(0)?;
            Ok::<_, HttpError>(c.echo(&req))
        })
        .request(0)
        .authorized();
    }
}

/// `GET /health`
#[derive(Debug, Default)]
pub struct HealthController;

impl Controller for HealthController {
    fn describe(def: &mut ControllerDef<'_, Self>) {
        def.prefix("health");
        def.get("", "health", |_: &HealthController, _: Arguments| json!({ "status": "ok" }));
    }
}
