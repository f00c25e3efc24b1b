//! Ghost Resource
//!
//! Cache payload wrapper. Presence of a ghost in the store means the
//! resource was last known to exist; the payload may still be unresolved.

use parking_lot::RwLock;
use std::sync::Arc;

/// Lazily resolved cache value
#[derive(Debug)]
pub struct GhostResource<T> {
    payload: RwLock<Option<Arc<T>>>,
}

impl<T> GhostResource<T> {
    /// Existence placeholder without content
    pub fn unresolved() -> Self {
        Self {
            payload: RwLock::new(None),
        }
    }

    /// Ghost carrying a resolved value
    pub fn resolved(value: T) -> Self {
        Self {
            payload: RwLock::new(Some(Arc::new(value))),
        }
    }

    /// The resolved value, if any
    pub fn payload(&self) -> Option<Arc<T>> {
        self.payload.read().clone()
    }

    /// Resolve (or re-resolve) the payload
    pub fn set_payload(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.payload.write() = Some(Arc::clone(&value));
        value
    }

    pub fn is_resolved(&self) -> bool {
        self.payload.read().is_some()
    }
}

impl<T> Default for GhostResource<T> {
    fn default() -> Self {
        Self::unresolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_placeholder() {
        let ghost: GhostResource<String> = GhostResource::unresolved();
        assert!(!ghost.is_resolved());
        assert!(ghost.payload().is_none());

        ghost.set_payload("v1".to_string());
        assert_eq!(ghost.payload().as_deref().map(String::as_str), Some("v1"));

        // later sets overwrite
        ghost.set_payload("v2".to_string());
        assert_eq!(*ghost.payload().unwrap(), "v2");
    }

    #[test]
    fn test_resolved_constructor() {
        let ghost = GhostResource::resolved(7u32);
        assert!(ghost.is_resolved());
        assert_eq!(*ghost.payload().unwrap(), 7);
    }
}
