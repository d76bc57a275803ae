use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::processors::*;
use super::{Controller, HandlerFactory};
use crate::auth::BaseRoute;
use crate::binder::{Arguments, ParamSource};
use crate::crud::CrudRoute;
use crate::dispatcher::{BoundHandler, IntoReply};
use crate::error::RegistrationError;
use crate::metadata::{keys, MetadataStore, Subject};
use crate::middleware::{Middleware, UploadMiddleware, Validate, ValidateBody};

/// Class-level declaration of controller `C`.
///
/// ```
/// use routemark::{Arguments, Controller, ControllerDef, MetadataStore};
/// use serde_json::{json, Value};
///
/// struct Users;
///
/// impl Controller for Users {
///     fn describe(def: &mut ControllerDef<'_, Self>) {
///         def.prefix("/users");
///         def.get(":id", "get_one", |_: &Users, mut args: Arguments| {
///             let params: Value = args.extract(0)?;
///             Ok::<_, routemark::HttpError>(json!({ "id": params["id"] }))
///         })
///         .params(0);
///     }
/// }
///
/// let mut store = MetadataStore::new();
/// store.declare::<Users>();
/// assert_eq!(store.controllers().len(), 1);
/// ```
pub struct ControllerDef<'a, C> {
    store: &'a mut MetadataStore,
    subject: Subject,
    _controller: PhantomData<fn() -> C>,
}

impl<'a, C: Controller> ControllerDef<'a, C> {
    pub(crate) fn new(store: &'a mut MetadataStore) -> Self {
        let subject = Subject::of::<C>();
        if !store.has(subject, None, keys::PREFIX) {
            mark_controller(store, subject, "");
        }
        Self {
            store,
            subject,
            _controller: PhantomData,
        }
    }

    #[must_use]
    pub fn subject(&self) -> Subject {
        self.subject
    }

    /// Path prefix shared by all routes of the controller.
    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        mark_controller(self.store, self.subject, prefix);
        self
    }

    /// Every route of the controller requires the guard.
    pub fn authorized(&mut self) -> &mut Self {
        mark_auth(self.store, self.subject, None);
        self
    }

    /// Require the guard for the listed base routes only.
    pub fn auth_for_routes<I, R>(&mut self, routes: I) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<BaseRoute>,
    {
        mark_auth_for_routes(self.store, self.subject, routes.into_iter().map(Into::into));
        self
    }

    /// Middleware shared by all routes of the controller.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        mark_shared_middleware(self.store, self.subject, Arc::new(middleware));
        self
    }

    /// Declare a route handled by `handler`.
    pub fn route<F, R>(
        &mut self,
        method: Method,
        path: &str,
        handler_key: &str,
        handler: F,
    ) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        mark_route(
            self.store,
            self.subject,
            method.clone(),
            path,
            handler_key,
            handler_factory::<C, F, R>(handler),
        );
        RouteDef {
            store: self.store,
            subject: self.subject,
            method,
            path: path.to_string(),
            handler_key: handler_key.to_string(),
            _controller: PhantomData,
        }
    }

    pub fn get<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::GET, path, handler_key, handler)
    }

    pub fn post<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::POST, path, handler_key, handler)
    }

    pub fn put<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::PUT, path, handler_key, handler)
    }

    pub fn patch<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::PATCH, path, handler_key, handler)
    }

    pub fn delete<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::DELETE, path, handler_key, handler)
    }

    pub fn options<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::OPTIONS, path, handler_key, handler)
    }

    pub fn head<F, R>(&mut self, path: &str, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::HEAD, path, handler_key, handler)
    }

    /// Declare one of the conventional CRUD endpoints.
    pub fn crud<F, R>(&mut self, route: CrudRoute, handler_key: &str, handler: F) -> RouteDef<'_, C>
    where
        F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(route.method(), route.path(), handler_key, handler)
    }
}

/// Method- and parameter-level markers of one declared route.
///
/// Every marker except [`RouteDef::middleware`] applies to the handler, and so to every route
/// that shares its handler key.
pub struct RouteDef<'a, C> {
    store: &'a mut MetadataStore,
    subject: Subject,
    method: Method,
    path: String,
    handler_key: String,
    _controller: PhantomData<fn() -> C>,
}

impl<C> RouteDef<'_, C> {
    /// This handler requires the guard.
    pub fn authorized(&mut self) -> &mut Self {
        mark_auth(self.store, self.subject, Some(&self.handler_key));
        self
    }

    /// Success status code used in the response envelope.
    pub fn http_code(&mut self, code: u16) -> &mut Self {
        mark_http_code(self.store, self.subject, &self.handler_key, code);
        self
    }

    /// Validate the body by deserializing into `T` and running [`Validate`].
    ///
    /// Validation runs before the upload middlewares, so on a multipart route it sees the body
    /// without the form's text fields (an empty object). Validate those fields in the handler.
    pub fn validate_body<T: DeserializeOwned + Validate + 'static>(&mut self) -> &mut Self {
        let validator = Arc::new(ValidateBody::typed::<T>());
        mark_validation(self.store, self.subject, &self.handler_key, validator);
        self
    }

    /// Validate the body against a JSON Schema. Runs ahead of uploads, like
    /// [`validate_body`](Self::validate_body).
    pub fn validate_schema(&mut self, schema: &Value) -> &mut Self {
        match ValidateBody::schema(schema) {
            Ok(validator) => {
                mark_validation(self.store, self.subject, &self.handler_key, Arc::new(validator));
            }
            Err(message) => {
                record_declaration_error(self.store, self.subject, &self.handler_key, message);
            }
        }
        self
    }

    /// Accept one file under `field`, bound at parameter `index`.
    ///
    /// Text fields of the form are merged into the body after any body validation ran.
    pub fn upload_file(&mut self, field: &str, index: usize) -> &mut Self {
        mark_upload(
            self.store,
            self.subject,
            &self.handler_key,
            Arc::new(UploadMiddleware::single(field)),
            ParamSource::SingleFile,
            index,
        );
        self
    }

    /// Accept any number of files under `field`, bound at parameter `index`.
    pub fn upload_files(&mut self, field: &str, index: usize) -> &mut Self {
        mark_upload(
            self.store,
            self.subject,
            &self.handler_key,
            Arc::new(UploadMiddleware::multiple(field)),
            ParamSource::MultiFile,
            index,
        );
        self
    }

    pub fn bind(&mut self, source: ParamSource, index: usize) -> &mut Self {
        mark_param(self.store, self.subject, &self.handler_key, source, index);
        self
    }

    pub fn body(&mut self, index: usize) -> &mut Self {
        self.bind(ParamSource::Body, index)
    }

    pub fn query(&mut self, index: usize) -> &mut Self {
        self.bind(ParamSource::Query, index)
    }

    pub fn params(&mut self, index: usize) -> &mut Self {
        self.bind(ParamSource::Params, index)
    }

    pub fn request(&mut self, index: usize) -> &mut Self {
        self.bind(ParamSource::Request, index)
    }

    pub fn response(&mut self, index: usize) -> &mut Self {
        self.bind(ParamSource::Response, index)
    }

    /// Attach a middleware to this route only; it runs after every other route middleware.
    pub fn middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        mark_route_middleware(
            self.store,
            self.subject,
            &self.method,
            &self.path,
            &self.handler_key,
            Arc::new(middleware),
        );
        self
    }
}

fn handler_factory<C, F, R>(handler: F) -> HandlerFactory
where
    C: Controller,
    F: Fn(&C, Arguments) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    let handler = Arc::new(handler);
    Arc::new(move |instance: Arc<dyn Any + Send + Sync>| {
        let instance = instance.downcast::<C>().map_err(|_| {
            RegistrationError::InstanceTypeMismatch {
                controller: std::any::type_name::<C>(),
            }
        })?;
        let handler = Arc::clone(&handler);
        let bound: BoundHandler = Arc::new(move |args: Arguments| handler(&instance, args).into_reply());
        Ok(bound)
    })
}
