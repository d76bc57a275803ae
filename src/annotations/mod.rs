//! # Annotations
//!
//! Declarative markers for controllers, routes and handler parameters. A controller
//! describes itself once through [`Controller::describe`], either written by hand with the
//! [`ControllerDef`]/[`RouteDef`] builder or generated by the `#[controller]` attribute; each
//! builder call runs one processor from [`processors`], which records the marker in the
//! [`MetadataStore`].
//!
//! Nothing here touches the router. The registration pass reads the store once all
//! controllers are declared.

mod builder;
pub mod processors;

use std::any::Any;
use std::sync::Arc;

use crate::dispatcher::BoundHandler;
use crate::error::RegistrationError;
use crate::metadata::{MetadataStore, Subject};

pub use builder::{ControllerDef, RouteDef};

/// Binds a handler to the resolved controller instance at registration time.
pub type HandlerFactory = Arc<
    dyn Fn(Arc<dyn Any + Send + Sync>) -> Result<BoundHandler, RegistrationError> + Send + Sync,
>;

/// A type whose handlers are exposed as HTTP routes.
///
/// Instances are resolved once at registration and shared by every request, so they must be
/// stateless or internally synchronized.
pub trait Controller: Send + Sync + 'static {
    fn describe(def: &mut ControllerDef<'_, Self>)
    where
        Self: Sized;
}

impl MetadataStore {
    /// Run the declaration of `C` against this store.
    ///
    /// Declaring a controller a second time does nothing and returns `false`.
    pub fn declare<C: Controller>(&mut self) -> bool {
        if !self.mark_declared(Subject::of::<C>()) {
            return false;
        }
        let mut def = ControllerDef::<C>::new(self);
        C::describe(&mut def);
        true
    }
}
