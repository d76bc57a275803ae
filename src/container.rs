//! Controller instance resolution.
//!
//! The registration pass asks a [`Resolver`] for one instance per controller. [`Container`] is
//! the built-in resolver: instances registered up front, or lazily built singletons from
//! factories that may resolve their own dependencies.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::RegistrationError;
use crate::metadata::Subject;

pub type Instance = Arc<dyn Any + Send + Sync>;

type Provider = Box<dyn Fn(&Container) -> anyhow::Result<Instance> + Send + Sync>;

/// Source of controller instances.
pub trait Resolver {
    fn resolve(&self, subject: Subject) -> Result<Instance, RegistrationError>;
}

/// Singleton container keyed by type.
#[derive(Default)]
pub struct Container {
    providers: HashMap<TypeId, Provider>,
    instances: DashMap<TypeId, Instance>,
    resolving: Mutex<Vec<TypeId>>,
}

impl Container {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready-made instance.
    pub fn register_instance<T: Send + Sync + 'static>(&mut self, instance: T) -> &mut Self {
        self.register_shared(Arc::new(instance))
    }

    pub fn register_shared<T: Send + Sync + 'static>(&mut self, instance: Arc<T>) -> &mut Self {
        self.instances.insert(TypeId::of::<T>(), instance);
        self
    }

    /// Register a factory run on first resolution; the result is cached.
    pub fn register_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.providers.insert(
            TypeId::of::<T>(),
            Box::new(move |c| factory(c).map(|t| Arc::new(t) as Instance)),
        );
        self
    }

    /// Register `T::default()` as the factory for `T`.
    pub fn register_default<T: Default + Send + Sync + 'static>(&mut self) -> &mut Self {
        self.register_factory(|_| Ok(T::default()))
    }

    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.instances.contains_key(&id) || self.providers.contains_key(&id)
    }

    /// Resolve `T`, building it from its factory when needed.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, RegistrationError> {
        let instance = self.resolve_subject(Subject::of::<T>())?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistrationError::InstanceTypeMismatch {
                controller: std::any::type_name::<T>(),
            })
    }

    fn resolve_subject(&self, subject: Subject) -> Result<Instance, RegistrationError> {
        let id = subject.type_id();
        if let Some(existing) = self.instances.get(&id) {
            return Ok(Arc::clone(existing.value()));
        }
        let Some(provider) = self.providers.get(&id) else {
            return Err(RegistrationError::UnresolvedController {
                controller: subject.name(),
            });
        };

        {
            let mut resolving = self.resolving.lock();
            if resolving.contains(&id) {
                return Err(RegistrationError::Construction {
                    controller: subject.name(),
                    message: "dependency cycle".to_string(),
                });
            }
            resolving.push(id);
        }
        debug!(type_name = subject.name(), "Constructing instance from factory");
        let built = provider(self);
        self.resolving.lock().retain(|t| *t != id);

        let instance = built.map_err(|e| RegistrationError::Construction {
            controller: subject.name(),
            message: format!("{e:#}"),
        })?;
        self.instances.insert(id, Arc::clone(&instance));
        Ok(instance)
    }
}

impl Resolver for Container {
    fn resolve(&self, subject: Subject) -> Result<Instance, RegistrationError> {
        self.resolve_subject(subject)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.providers.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}
