//! Type-keyed shared services.
//!
//! Modules reach shared objects (the loader, the package manager, the
//! session start time) through [`Services`] instead of globals. Each type is
//! stored at most once; inserting the same type again replaces it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Type alias for the heterogeneous values stored in [`Services`].
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

/// A `TypeId`-keyed map of shared services.
#[derive(Default)]
pub struct Services {
    map: RwLock<HashMap<TypeId, ServiceArc>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `service`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, service: Arc<T>) -> Option<Arc<T>> {
        self.map
            .write()
            .insert(TypeId::of::<T>(), service)
            .and_then(|prev| prev.downcast::<T>().ok())
    }

    /// Returns the service of type `T`, if registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let any = self.map.read().get(&TypeId::of::<T>()).cloned()?;
        any.downcast::<T>().ok()
    }

    /// Removes and returns the service of type `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|prev| prev.downcast::<T>().ok())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct StartedAt(u64);

    #[test]
    fn test_insert_get_replace() {
        let services = Services::new();
        assert!(services.get::<StartedAt>().is_none());

        assert!(services.insert(Arc::new(StartedAt(1))).is_none());
        assert_eq!(*services.get::<StartedAt>().unwrap(), StartedAt(1));

        let prev = services.insert(Arc::new(StartedAt(2))).unwrap();
        assert_eq!(*prev, StartedAt(1));
        assert_eq!(services.len(), 1);

        assert_eq!(*services.remove::<StartedAt>().unwrap(), StartedAt(2));
        assert!(services.is_empty());
    }
}
