//! A thread-safe in-memory holder for the currently active bundle. [`BundleStore`] provides
//! concurrent access for readers (resolution) and writers (an external refresh mechanism).
use std::sync::{Arc, RwLock};

use crate::bundle::ConfigBundle;

/// `BundleStore` provides a thread-safe (`Sync`) storage for the configuration bundle.
///
/// Bundles are immutable and only ever replaced completely, so a reader that captured a snapshot
/// never observes a partially-updated bundle.
#[derive(Debug, Default)]
pub struct BundleStore {
    bundle: RwLock<Option<Arc<ConfigBundle>>>,
}

impl BundleStore {
    /// Create a new empty store.
    pub fn new() -> BundleStore {
        BundleStore::default()
    }

    /// Get the currently active bundle. Returns `None` if no bundle has been stored yet.
    pub fn get_bundle(&self) -> Option<Arc<ConfigBundle>> {
        // read() returns Err only if a writer panicked while holding the lock. The slot is a
        // single pointer swap, so the poisoned value is still consistent.
        let bundle = self
            .bundle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bundle.clone()
    }

    /// Set a new bundle, returning the previous one.
    pub fn set_bundle(&self, bundle: Arc<ConfigBundle>) -> Option<Arc<ConfigBundle>> {
        let mut slot = self
            .bundle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        log::debug!(target: "rollout", version:display = bundle.version; "replacing bundle");
        slot.replace(bundle)
    }

    /// Remove the active bundle. Subsequent resolutions fall back to caller defaults.
    pub fn clear(&self) -> Option<Arc<ConfigBundle>> {
        self.bundle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::engine::tests::layered_bundle;

    use super::BundleStore;

    #[test]
    fn can_set_bundle_from_another_thread() {
        let store = Arc::new(BundleStore::new());

        assert!(store.get_bundle().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_bundle(Arc::new(layered_bundle()));
            })
            .join();
        }

        assert!(store.get_bundle().is_some());
    }

    #[test]
    fn snapshot_survives_replacement() {
        let store = BundleStore::new();
        store.set_bundle(Arc::new(layered_bundle()));
        let snapshot = store.get_bundle().unwrap();

        let mut next = layered_bundle();
        next.layers.clear();
        let previous = store.set_bundle(Arc::new(next));

        assert!(Arc::ptr_eq(&snapshot, &previous.unwrap()));
        assert_eq!(snapshot.layers.len(), 5);
        assert!(store.get_bundle().unwrap().layers.is_empty());

        store.clear();
        assert!(store.get_bundle().is_none());
    }
}
