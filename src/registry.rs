//! Table of in-flight requests keyed by opaque handles.
//!
//! Handles are what the host holds on to. They are never reused within the
//! lifetime of a registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque identifier for a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    prefix: &'static str,
    id: u64,
}

impl Handle {
    /// The numeric part.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix, self.id)
    }
}

/// Concurrent map from [`Handle`] to shared entries.
pub struct Registry<T> {
    prefix: &'static str,
    next: AtomicU64,
    entries: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry. `prefix` shows up in handle display strings.
    pub fn new(prefix: &'static str) -> Self {
        Registry {
            prefix,
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh handle without inserting anything.
    pub fn allocate(&self) -> Handle {
        Handle {
            prefix: self.prefix,
            id: self.next.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Insert under a fresh handle.
    pub fn insert(&self, value: Arc<T>) -> Handle {
        let handle = self.allocate();
        self.entries.lock().insert(handle.id, value);
        handle
    }

    /// Insert under a handle previously obtained from [`allocate()`][Self::allocate].
    pub fn insert_at(&self, handle: Handle, value: Arc<T>) {
        let prev = self.entries.lock().insert(handle.id, value);
        if prev.is_some() {
            warn!("Registry entry replaced: {}", handle);
        }
    }

    /// Look up an entry.
    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        self.entries.lock().get(&handle.id).cloned()
    }

    /// Remove an entry. Removing twice is harmless.
    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        self.entries.lock().remove(&handle.id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Tell if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries.
    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries.lock().values().cloned().collect()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.prefix)
            .field("len", &self.len())
            .finish()
    }
}
