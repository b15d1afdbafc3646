use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::runtime::EnvironmentHandle;

/// Live environment handles, at most one per user.
///
/// The map lock is only held for single get/put/take calls. Callers that
/// need a multi-step sequence for one user (discard then create, copy then
/// execute) run it inside [`EnvironmentRegistry::with_user`].
#[derive(Default)]
pub struct EnvironmentRegistry {
    live: Mutex<HashMap<String, EnvironmentHandle>>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, EnvironmentHandle>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.user_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The serialization lock for one user's lifecycle operations.
    fn lock_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks().entry(user_id.to_string()).or_default())
    }

    /// Run `f` while holding the user's lock.
    ///
    /// The lock entry is dropped once no other caller holds or waits on it,
    /// so the lock map only tracks users with an operation in flight.
    pub fn with_user<T>(&self, user_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_user(user_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        // Clones are only handed out under the map lock, so a count of two
        // (the map and `lock`) means nobody else is waiting
        let mut locks = self.locks();
        if Arc::strong_count(&lock) == 2
            && locks.get(user_id).is_some_and(|held| Arc::ptr_eq(held, &lock))
        {
            locks.remove(user_id);
        }
        result
    }

    /// Number of users with a lifecycle operation in flight.
    #[cfg(test)]
    pub fn tracked_locks(&self) -> usize {
        self.locks().len()
    }

    pub fn get(&self, user_id: &str) -> Option<EnvironmentHandle> {
        self.live().get(user_id).cloned()
    }

    /// Register a handle. Returns the handle it displaced, which callers
    /// treat as a bug: creation paths always discard first.
    pub fn put(&self, user_id: &str, handle: EnvironmentHandle) -> Option<EnvironmentHandle> {
        self.live().insert(user_id.to_string(), handle)
    }

    /// Remove and return the user's handle. Only the discard path calls this.
    pub(super) fn take_and_clear(&self, user_id: &str) -> Option<EnvironmentHandle> {
        self.live().remove(user_id)
    }

    /// Copy of all registered (user id, handle) pairs, sorted by user id.
    pub fn snapshot(&self) -> Vec<(String, EnvironmentHandle)> {
        let mut entries: Vec<_> = self
            .live()
            .iter()
            .map(|(user, handle)| (user.clone(), handle.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live().is_empty()
    }
}
