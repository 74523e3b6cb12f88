// Opaque integer handle tables, one per engine type. `create` takes the
// writer lock and inserts; `delete` takes the writer lock and erases; every
// other operation takes the reader lock and looks up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use corestream_types::{CoreError, CoreResult};

/// Opaque handle type handed back to a caller. Always `> 0`; `0` is never
/// issued, so it's safe for a host to use `0` as a sentinel for "no handle".
pub type Handle = u64;

pub struct HandleTable<T> {
    next: AtomicU64,
    entries: RwLock<HashMap<Handle, Arc<T>>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under a freshly minted handle and returns it.
    pub fn insert(&self, value: T) -> Handle {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(handle, Arc::new(value));
        handle
    }

    /// Looks up `handle`, cloning out the shared reference. A missing handle
    /// is a programmer error, surfaced as a generic runtime error.
    pub fn get(&self, handle: Handle) -> CoreResult<Arc<T>> {
        self.entries
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| CoreError::runtime(format!("invalid handle: {handle}")))
    }

    /// Erases `handle`, returning the removed entry so the caller can run
    /// any teardown logic before the last `Arc` reference drops.
    pub fn remove(&self, handle: Handle) -> CoreResult<Arc<T>> {
        self.entries
            .write()
            .remove(&handle)
            .ok_or_else(|| CoreError::runtime(format!("invalid handle: {handle}")))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Erases every entry. Used by `ForeignBridge` teardown.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let table: HandleTable<u32> = HandleTable::new();
        let handle = table.insert(42);
        assert_eq!(*table.get(handle).unwrap(), 42);
    }

    #[test]
    fn handles_are_never_zero_and_never_reused() {
        let table: HandleTable<u32> = HandleTable::new();
        let a = table.insert(1);
        let b = table.insert(2);
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn get_on_missing_handle_is_a_runtime_error() {
        let table: HandleTable<u32> = HandleTable::new();
        assert!(table.get(999).is_err());
    }

    #[test]
    fn remove_then_get_fails() {
        let table: HandleTable<u32> = HandleTable::new();
        let handle = table.insert(7);
        assert!(table.remove(handle).is_ok());
        assert!(table.get(handle).is_err());
    }
}
