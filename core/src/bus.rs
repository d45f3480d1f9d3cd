//! Bus - Type-Safe Dependency Injection
//!
//! The Bus carries the collaborators a flow may read while it reacts: identity and
//! authenticator stores, event dispatchers, configuration. Resources are keyed by type,
//! usually `Arc<dyn Trait>`.

use crate::error::FlowError;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

/// Type-keyed resource container (TypeMap pattern).
#[derive(Default)]
pub struct Bus {
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            resources: HashMap::new(),
        }
    }

    /// Insert a resource into the Bus.
    ///
    /// If a resource of this type already exists, it is replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, resource: T) {
        self.resources.insert(TypeId::of::<T>(), Box::new(resource));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Send + Sync + 'static>(mut self, resource: T) -> Self {
        self.insert(resource);
        self
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Get a resource a reactor cannot work without.
    ///
    /// A missing dependency is a wiring bug, reported as an internal error.
    pub fn require<T: 'static>(&self) -> Result<&T, FlowError> {
        self.get::<T>()
            .ok_or(FlowError::MissingDependency(type_name::<T>()))
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("resource_count", &self.resources.len())
            .finish()
    }
}
