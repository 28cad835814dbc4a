//! Per-delivery service scope.
//!
//! Each handler invocation gets a short-lived lookup context for obtaining
//! dependencies without reaching for global state. Decorators may add
//! capabilities mid-chain (the duplicate-detection decorator contributes the
//! delivery's database transaction); the scope is dropped when the delivery
//! finishes.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A map from capability type to instance, scoped to one delivery.
///
/// Lookups are by concrete type:
///
/// ```
/// use conveyor_core::scope::ServiceScope;
/// use std::sync::Arc;
///
/// struct Mailer;
///
/// let scope = ServiceScope::new();
/// scope.insert(Arc::new(Mailer));
/// assert!(scope.get::<Mailer>().is_some());
/// ```
#[derive(Default)]
pub struct ServiceScope {
    entries: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous instance of the type.
    pub fn insert<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), service);
    }

    /// Look up a capability by type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ServiceScope").field("entries", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    #[test]
    fn insert_then_get_returns_the_instance() {
        let scope = ServiceScope::new();
        scope.insert(Arc::new(Counter(7)));

        let counter = scope.get::<Counter>();
        assert_eq!(counter.map(|c| c.0), Some(7));
    }

    #[test]
    fn get_of_unregistered_type_is_none() {
        let scope = ServiceScope::new();
        assert!(scope.get::<Counter>().is_none());
    }

    #[test]
    fn insert_replaces_previous_instance() {
        let scope = ServiceScope::new();
        scope.insert(Arc::new(Counter(1)));
        scope.insert(Arc::new(Counter(2)));

        assert_eq!(scope.get::<Counter>().map(|c| c.0), Some(2));
    }
}
