//! Type-keyed service accessor handed to factory callbacks
//!
//! Host integrations register shared services (a discovery client, a token
//! source) once; the handler factory and the per-client configure callback
//! look them up by type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(service));
    }

    /// Chaining form of [`Services::insert`].
    pub fn with<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.insert(service);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let service = self.entries.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("registered", &self.entries.len())
            .finish()
    }
}
