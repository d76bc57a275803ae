//! # Metadata Store
//!
//! A keyed registry from (controller type, optional member) to typed values. Annotation
//! processors write into it while controllers are declared; the registration pass reads it
//! through a shared reference after declaration is finished, and the application keeps it
//! read-only for the rest of the process lifetime.
//!
//! Keys are typed ([`MetaKey<T>`]), so a value is always read back as the type it was written
//! with. The well-known keys used by the annotation processors live in [`keys`].
//!
//! ```
//! use routemark::metadata::{MetaKey, MetadataStore, Subject};
//!
//! struct Users;
//! const TAG: MetaKey<&'static str> = MetaKey::new("tag");
//!
//! let mut store = MetadataStore::new();
//! let users = Subject::of::<Users>();
//! store.define(users, Some("list"), TAG, "read");
//! assert_eq!(store.get(users, Some("list"), TAG), Some(&"read"));
//! assert_eq!(store.get(users, None, TAG), None);
//! ```

use crate::auth::BaseRoute;
use crate::middleware::Middleware;
use http::Method;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Identity of a controller type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subject {
    id: TypeId,
    name: &'static str,
}

impl Subject {
    #[must_use]
    pub fn of<C: 'static>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subject({})", self.name)
    }
}

/// A metadata key whose values have type `T`.
pub struct MetaKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MetaKey<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for MetaKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MetaKey<T> {}

impl<T> fmt::Debug for MetaKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetaKey({})", self.name)
    }
}

/// One declared route of a controller.
///
/// Identity is `(method, raw_path, handler_key)`; the route marker never inserts a second
/// descriptor with the same identity.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: Method,
    pub handler_key: String,
    pub raw_path: String,
    /// Middlewares attached directly to this route; they run last in the route chain.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl RouteDescriptor {
    pub fn new(method: Method, raw_path: impl Into<String>, handler_key: impl Into<String>) -> Self {
        Self {
            method,
            handler_key: handler_key.into(),
            raw_path: raw_path.into(),
            middlewares: Vec::new(),
        }
    }

    #[must_use]
    pub fn same_identity(&self, method: &Method, raw_path: &str, handler_key: &str) -> bool {
        self.method == *method && self.raw_path == raw_path && self.handler_key == handler_key
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("handler_key", &self.handler_key)
            .field("raw_path", &self.raw_path)
            .field(
                "middlewares",
                &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Borrowed view of everything declared at class level for one controller.
#[derive(Debug, Clone, Copy)]
pub struct ControllerDescriptor<'a> {
    pub subject: Subject,
    pub prefix: &'a str,
    /// Most recently declared route first.
    pub routes: &'a [RouteDescriptor],
    pub class_auth_required: bool,
    pub base_route_overrides: &'a [BaseRoute],
}

/// Keys written by the annotation processors.
pub mod keys {
    use super::{MetaKey, RouteDescriptor};
    use crate::annotations::HandlerFactory;
    use crate::auth::BaseRoute;
    use crate::middleware::Middleware;
    use std::sync::Arc;

    /// Class: path prefix recorded by the controller marker.
    pub const PREFIX: MetaKey<String> = MetaKey::new("prefix");
    /// Class: declared routes, most recent first.
    pub const ROUTES: MetaKey<Vec<RouteDescriptor>> = MetaKey::new("routes");
    /// Class or member: auth marker.
    pub const AUTH: MetaKey<bool> = MetaKey::new("auth");
    /// Class: base-route auth overrides.
    pub const AUTH_FOR_BASE_ROUTE: MetaKey<Vec<BaseRoute>> = MetaKey::new("authForBaseRoute");
    /// Member: success status code.
    pub const HTTP_CODE: MetaKey<u16> = MetaKey::new("httpCode");
    /// Class: shared middlewares. Member: validation and upload markers in chain order.
    pub const MIDDLEWARES: MetaKey<Vec<Arc<dyn Middleware>>> = MetaKey::new("middlewares");
    /// Member: the handler bound at registration.
    pub const HANDLER: MetaKey<HandlerFactory> = MetaKey::new("handler");
    /// Member: errors found while processing declarations, reported by the registration pass.
    pub const DECLARATION_ERRORS: MetaKey<Vec<String>> = MetaKey::new("declarationErrors");
}

type Slot = Box<dyn Any + Send + Sync>;

#[derive(Default)]
struct SubjectEntries {
    class: HashMap<&'static str, Slot>,
    members: HashMap<String, HashMap<&'static str, Slot>>,
}

/// The registry written by annotation processors and read by the registration pass.
#[derive(Default)]
pub struct MetadataStore {
    entries: HashMap<Subject, SubjectEntries>,
    /// Controllers in declaration order.
    declared: Vec<Subject>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn define<T: Any + Send + Sync>(
        &mut self,
        subject: Subject,
        member: Option<&str>,
        key: MetaKey<T>,
        value: T,
    ) {
        self.slots_mut(subject, member)
            .insert(key.name(), Box::new(value));
    }

    #[must_use]
    pub fn get<T: Any + Send + Sync>(
        &self,
        subject: Subject,
        member: Option<&str>,
        key: MetaKey<T>,
    ) -> Option<&T> {
        let entries = self.entries.get(&subject)?;
        let slots = match member {
            Some(m) => entries.members.get(m)?,
            None => &entries.class,
        };
        slots.get(key.name())?.downcast_ref::<T>()
    }

    #[must_use]
    pub fn has<T: Any + Send + Sync>(
        &self,
        subject: Subject,
        member: Option<&str>,
        key: MetaKey<T>,
    ) -> bool {
        self.get(subject, member, key).is_some()
    }

    /// Mutable access to the value under `key`, inserting `init()` first when absent or when
    /// the stored value has a different type.
    pub fn get_or_insert_with<T: Any + Send + Sync>(
        &mut self,
        subject: Subject,
        member: Option<&str>,
        key: MetaKey<T>,
        init: impl FnOnce() -> T,
    ) -> &mut T {
        let slots = self.slots_mut(subject, member);
        let reusable = slots.get(key.name()).is_some_and(|slot| slot.is::<T>());
        if !reusable {
            slots.insert(key.name(), Box::new(init()));
        }
        match slots.get_mut(key.name()).and_then(|slot| slot.downcast_mut::<T>()) {
            Some(value) => value,
            None => unreachable_slot(),
        }
    }

    /// Record `subject` as a declared controller. Returns `false` when it already was.
    pub(crate) fn mark_declared(&mut self, subject: Subject) -> bool {
        if self.declared.contains(&subject) {
            return false;
        }
        self.declared.push(subject);
        true
    }

    /// Controllers in the order they were declared.
    #[must_use]
    pub fn controllers(&self) -> &[Subject] {
        &self.declared
    }

    /// Class-level view of a controller, if any annotation was processed for it.
    #[must_use]
    pub fn controller(&self, subject: Subject) -> Option<ControllerDescriptor<'_>> {
        if !self.entries.contains_key(&subject) {
            return None;
        }
        Some(ControllerDescriptor {
            subject,
            prefix: self
                .get(subject, None, keys::PREFIX)
                .map(String::as_str)
                .unwrap_or(""),
            routes: self
                .get(subject, None, keys::ROUTES)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            class_auth_required: self
                .get(subject, None, keys::AUTH)
                .copied()
                .unwrap_or(false),
            base_route_overrides: self
                .get(subject, None, keys::AUTH_FOR_BASE_ROUTE)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        })
    }

    fn slots_mut(&mut self, subject: Subject, member: Option<&str>) -> &mut HashMap<&'static str, Slot> {
        let entries = self.entries.entry(subject).or_default();
        match member {
            Some(m) => entries.members.entry(m.to_string()).or_default(),
            None => &mut entries.class,
        }
    }
}

// The slot was just (re)filled with a `T`, so the downcast cannot fail.
#[allow(clippy::unreachable)]
fn unreachable_slot() -> ! {
    unreachable!("metadata slot type was checked before downcast")
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStore")
            .field("controllers", &self.declared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Users;
    struct Orders;

    #[test]
    fn test_class_and_member_values_are_separate() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        store.define(users, None, keys::AUTH, true);
        store.define(users, Some("list"), keys::AUTH, false);

        assert_eq!(store.get(users, None, keys::AUTH), Some(&true));
        assert_eq!(store.get(users, Some("list"), keys::AUTH), Some(&false));
        assert_eq!(store.get(users, Some("other"), keys::AUTH), None);
        assert_eq!(store.get(Subject::of::<Orders>(), None, keys::AUTH), None);
    }

    #[test]
    fn test_get_or_insert_with_keeps_existing() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        store
            .get_or_insert_with(users, None, keys::PREFIX, String::new)
            .push_str("/users");
        let prefix = store.get_or_insert_with(users, None, keys::PREFIX, || "ignored".into());
        assert_eq!(prefix, "/users");
    }

    #[test]
    fn test_get_or_insert_with_replaces_other_type() {
        const AS_FLAG: MetaKey<bool> = MetaKey::new("prefix");
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        store.define(users, None, AS_FLAG, true);

        let prefix = store.get_or_insert_with(users, None, keys::PREFIX, || "/fresh".into());
        assert_eq!(prefix, "/fresh");
        assert_eq!(store.get(users, None, AS_FLAG), None);
        assert_eq!(store.get(users, None, keys::PREFIX).map(String::as_str), Some("/fresh"));
    }

    #[test]
    fn test_controller_view_defaults() {
        let mut store = MetadataStore::new();
        let users = Subject::of::<Users>();
        assert!(store.controller(users).is_none());
        store.define(users, None, keys::PREFIX, "/users".to_string());

        let view = store.controller(users).unwrap();
        assert_eq!(view.prefix, "/users");
        assert!(view.routes.is_empty());
        assert!(!view.class_auth_required);
        assert!(view.base_route_overrides.is_empty());
    }

    #[test]
    fn test_declared_order_and_dedupe() {
        let mut store = MetadataStore::new();
        assert!(store.mark_declared(Subject::of::<Users>()));
        assert!(store.mark_declared(Subject::of::<Orders>()));
        assert!(!store.mark_declared(Subject::of::<Users>()));
        assert_eq!(
            store.controllers(),
            &[Subject::of::<Users>(), Subject::of::<Orders>()]
        );
    }
}
