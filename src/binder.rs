//! # Parameter Binder
//!
//! Maps the parameter-source tags recorded for a handler to argument values taken from the
//! request context, and converts those values into the handler's parameter types.
//!
//! `Body`, `Query` and `Params` bind a copy of the request sub-object so a handler mutating
//! its argument never changes what later readers of the request see. `Request` and `Response`
//! bind live handles. File sources bind whatever the upload middleware attached.

use crate::context::{RequestContext, RequestHandle, ResponseHandle, UploadedFile};
use crate::error::{HttpError, RegistrationError};
use crate::metadata::{MetaKey, MetadataStore, Subject};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Where a handler parameter is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamSource {
    Body,
    Request,
    Response,
    Params,
    Query,
    SingleFile,
    MultiFile,
}

impl ParamSource {
    pub const ALL: [ParamSource; 7] = [
        ParamSource::Body,
        ParamSource::Request,
        ParamSource::Response,
        ParamSource::Params,
        ParamSource::Query,
        ParamSource::SingleFile,
        ParamSource::MultiFile,
    ];

    /// Member key holding the parameter indices bound to this source.
    #[must_use]
    pub const fn key(self) -> MetaKey<Vec<usize>> {
        match self {
            ParamSource::Body => MetaKey::new("param:body"),
            ParamSource::Request => MetaKey::new("param:request"),
            ParamSource::Response => MetaKey::new("param:response"),
            ParamSource::Params => MetaKey::new("param:params"),
            ParamSource::Query => MetaKey::new("param:query"),
            ParamSource::SingleFile => MetaKey::new("param:file"),
            ParamSource::MultiFile => MetaKey::new("param:files"),
        }
    }
}

/// A single parameter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBinding {
    pub index: usize,
    pub source: ParamSource,
}

/// All bindings of one handler, ordered by parameter index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamBindings {
    bindings: Vec<ParameterBinding>,
}

impl ParamBindings {
    /// Read the recorded bindings of `handler_key`.
    ///
    /// Fails when one index was tagged with two different sources.
    pub fn collect(
        store: &MetadataStore,
        subject: Subject,
        handler_key: &str,
    ) -> Result<Self, RegistrationError> {
        let mut bindings: Vec<ParameterBinding> = Vec::new();
        for source in ParamSource::ALL {
            let Some(indices) = store.get(subject, Some(handler_key), source.key()) else {
                continue;
            };
            for &index in indices {
                if let Some(existing) = bindings.iter().find(|b| b.index == index) {
                    if existing.source != source {
                        return Err(RegistrationError::ConflictingParameterSource {
                            controller: subject.name(),
                            handler: handler_key.to_string(),
                            index,
                            first: existing.source,
                            second: source,
                        });
                    }
                    continue;
                }
                bindings.push(ParameterBinding { index, source });
            }
        }
        bindings.sort_by_key(|b| b.index);
        Ok(Self { bindings })
    }

    #[must_use]
    pub fn from_bindings(mut bindings: Vec<ParameterBinding>) -> Self {
        bindings.sort_by_key(|b| b.index);
        bindings.dedup_by_key(|b| b.index);
        Self { bindings }
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, ParameterBinding> {
        self.bindings.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of argument slots needed: one past the highest bound index.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.bindings.last().map_or(0, |b| b.index + 1)
    }
}

/// One bound argument value.
#[derive(Debug, Clone)]
pub enum Argument {
    Json(Value),
    Request(RequestHandle),
    Response(ResponseHandle),
    File(UploadedFile),
    Files(Vec<UploadedFile>),
}

/// Positional arguments for a handler call. Unbound positions are `None`.
#[derive(Debug, Default)]
pub struct Arguments {
    slots: Vec<Option<Argument>>,
}

impl Arguments {
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Argument> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn take(&mut self, index: usize) -> Option<Argument> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Take slot `index` and convert it into `T`.
    ///
    /// The conversion error is returned as-is; the slot index is only logged.
    pub fn extract<T: FromArgument>(&mut self, index: usize) -> Result<T, HttpError> {
        T::from_argument(self.take(index)).inspect_err(|err| {
            debug!(index, status = err.status, message = %err.message, "Argument extraction failed");
        })
    }
}

/// Build the argument list for one call from the current request state.
#[must_use]
pub fn bind(ctx: &RequestContext, bindings: &ParamBindings) -> Arguments {
    let mut slots: Vec<Option<Argument>> = vec![None; bindings.arity()];
    let request = ctx.request.lock();
    for binding in bindings.iter() {
        let value = match binding.source {
            ParamSource::Body => Some(Argument::Json(match &request.body {
                Value::Null => Value::Object(Map::new()),
                body => body.clone(),
            })),
            ParamSource::Query => Some(Argument::Json(Value::Object(request.query.clone()))),
            ParamSource::Params => Some(Argument::Json(Value::Object(request.params.clone()))),
            ParamSource::Request => Some(Argument::Request(ctx.request.clone())),
            ParamSource::Response => Some(Argument::Response(ctx.response.clone())),
            ParamSource::SingleFile => request.file.clone().map(Argument::File),
            ParamSource::MultiFile => request.files.clone().map(Argument::Files),
        };
        slots[binding.index] = value;
    }
    Arguments { slots }
}

/// Typed body, query or params extraction, deserialized with serde.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Conversion from a bound argument slot into a handler parameter type.
pub trait FromArgument: Sized {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError>;
}

fn missing() -> HttpError {
    HttpError::bad_request("missing argument")
}

fn mismatch(expected: &str) -> HttpError {
    HttpError::internal(format!("argument is not bound as {expected}"))
}

impl FromArgument for Value {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(Argument::Json(v)) => Ok(v),
            Some(_) => Err(mismatch("a JSON value")),
            None => Err(missing()),
        }
    }
}

impl<T: DeserializeOwned> FromArgument for Json<T> {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        let value = Value::from_argument(arg)?;
        serde_json::from_value(value)
            .map(Json)
            .map_err(|e| HttpError::bad_request(e.to_string()).with_source(e))
    }
}

impl FromArgument for RequestHandle {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(Argument::Request(r)) => Ok(r),
            Some(_) => Err(mismatch("the request")),
            None => Err(missing()),
        }
    }
}

impl FromArgument for ResponseHandle {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(Argument::Response(r)) => Ok(r),
            Some(_) => Err(mismatch("the response")),
            None => Err(missing()),
        }
    }
}

impl FromArgument for UploadedFile {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(Argument::File(f)) => Ok(f),
            Some(_) => Err(mismatch("a single file")),
            None => Err(HttpError::bad_request("no file uploaded")),
        }
    }
}

impl FromArgument for Vec<UploadedFile> {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(Argument::Files(f)) => Ok(f),
            Some(Argument::File(f)) => Ok(vec![f]),
            Some(_) => Err(mismatch("a file list")),
            None => Ok(Vec::new()),
        }
    }
}

impl<T: FromArgument> FromArgument for Option<T> {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        match arg {
            Some(arg) => T::from_argument(Some(arg)).map(Some),
            None => Ok(None),
        }
    }
}

impl FromArgument for Argument {
    fn from_argument(arg: Option<Argument>) -> Result<Self, HttpError> {
        arg.ok_or_else(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpRequest;
    use http::Method;
    use serde_json::json;

    struct Users;

    fn bindings(pairs: &[(usize, ParamSource)]) -> ParamBindings {
        ParamBindings::from_bindings(
            pairs
                .iter()
                .map(|&(index, source)| ParameterBinding { index, source })
                .collect(),
        )
    }

    #[test]
    fn test_body_and_query_are_copies() {
        let req = HttpRequest::new(Method::POST, "/users")
            .with_json(json!({ "name": "a" }))
            .with_query("page", "2");
        let ctx = RequestContext::new(req);
        let mut args = bind(
            &ctx,
            &bindings(&[(0, ParamSource::Body), (1, ParamSource::Query)]),
        );

        let mut body: Value = args.extract(0).unwrap();
        let query: Value = args.extract(1).unwrap();
        assert_eq!(body, json!({ "name": "a" }));
        assert_eq!(query, json!({ "page": "2" }));

        body["name"] = json!("changed");
        assert_eq!(ctx.request.lock().body, json!({ "name": "a" }));
    }

    #[test]
    fn test_missing_body_binds_empty_object() {
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/"));
        let mut args = bind(&ctx, &bindings(&[(0, ParamSource::Body)]));
        assert_eq!(args.extract::<Value>(0).unwrap(), json!({}));
    }

    #[test]
    fn test_unbound_positions_are_absent() {
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/"));
        let mut args = bind(&ctx, &bindings(&[(2, ParamSource::Params)]));
        assert_eq!(args.len(), 3);
        assert!(args.get(0).is_none());
        assert!(args.extract::<Option<Value>>(1).unwrap().is_none());
        assert_eq!(args.extract::<Value>(0).unwrap_err().status, 400);
    }

    #[test]
    fn test_files_absent_when_nothing_uploaded() {
        let ctx = RequestContext::new(HttpRequest::new(Method::POST, "/"));
        let mut args = bind(
            &ctx,
            &bindings(&[(0, ParamSource::SingleFile), (1, ParamSource::MultiFile)]),
        );
        assert!(args.extract::<Option<UploadedFile>>(0).unwrap().is_none());
        assert!(args.extract::<Vec<UploadedFile>>(1).unwrap().is_empty());
    }

    #[test]
    fn test_required_file_error_keeps_its_message() {
        let ctx = RequestContext::new(HttpRequest::new(Method::POST, "/"));
        let mut args = bind(&ctx, &bindings(&[(0, ParamSource::SingleFile)]));
        let err = args.extract::<UploadedFile>(0).unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "no file uploaded");
    }

    #[test]
    fn test_typed_extraction_failure_is_400() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Page {
            page: u32,
        }
        let ctx = RequestContext::new(HttpRequest::new(Method::GET, "/").with_query("page", "x"));
        let mut args = bind(&ctx, &bindings(&[(0, ParamSource::Query)]));
        let err = args.extract::<Json<Page>>(0).unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_collect_rejects_conflicting_sources() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        store.define(users, Some("create"), ParamSource::Body.key(), vec![0]);
        store.define(users, Some("create"), ParamSource::Query.key(), vec![0]);

        let err = ParamBindings::collect(&store, users, "create").unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::ConflictingParameterSource { index: 0, .. }
        ));
    }

    #[test]
    fn test_collect_orders_by_index() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        store.define(users, Some("h"), ParamSource::Query.key(), vec![1]);
        store.define(users, Some("h"), ParamSource::Body.key(), vec![0]);

        let collected = ParamBindings::collect(&store, users, "h").unwrap();
        let sources: Vec<_> = collected.iter().map(|b| b.source).collect();
        assert_eq!(sources, vec![ParamSource::Body, ParamSource::Query]);
        assert_eq!(collected.arity(), 2);
    }
}
