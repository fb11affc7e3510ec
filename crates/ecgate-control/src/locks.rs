//! Process-wide lock families.
//!
//! - [`TransferLocks`]: non-blocking ownership of a [`UniqueKey`] by one session,
//!   held for the whole admission and released by dropping the guard.
//! - [`NamedMutexes`]: short-lived blocking mutexes keyed by string, used around
//!   check-then-insert sequences. Entries are evicted once no guard refers to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ecgate_core::{SessionId, UniqueKey};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// The session owning a unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    /// Owning session.
    pub session_id: SessionId,
    /// Logged-in user.
    pub user: String,
    /// Client version string.
    pub version: String,
    /// Peer host.
    pub host: String,
    /// Peer port.
    pub port: u16,
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) from {}:{}",
            self.user, self.version, self.host, self.port
        )
    }
}

type OwnerMap = HashMap<UniqueKey, LockOwner>;

/// Registry of unique keys currently being admitted.
#[derive(Debug, Clone, Default)]
pub struct TransferLocks {
    owners: Arc<Mutex<OwnerMap>>,
}

impl TransferLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `key` without waiting.
    ///
    /// # Errors
    ///
    /// Returns the current owner if the key is already held.
    pub fn try_acquire(
        &self,
        key: &UniqueKey,
        owner: LockOwner,
    ) -> Result<TransferLockGuard, LockOwner> {
        let mut owners = self.owners.lock();
        if let Some(existing) = owners.get(key) {
            return Err(existing.clone());
        }
        let session_id = owner.session_id;
        owners.insert(key.clone(), owner);
        Ok(TransferLockGuard {
            owners: Arc::clone(&self.owners),
            key: key.clone(),
            session_id,
        })
    }

    /// Current owner of a key.
    #[must_use]
    pub fn owner(&self, key: &UniqueKey) -> Option<LockOwner> {
        self.owners.lock().get(key).cloned()
    }

    /// Number of held keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.lock().len()
    }

    /// Whether no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ownership of a unique key; released on drop.
#[derive(Debug)]
pub struct TransferLockGuard {
    owners: Arc<Mutex<OwnerMap>>,
    key: UniqueKey,
    session_id: SessionId,
}

impl TransferLockGuard {
    /// The held key.
    #[must_use]
    pub fn key(&self) -> &UniqueKey {
        &self.key
    }
}

impl Drop for TransferLockGuard {
    fn drop(&mut self) {
        let mut owners = self.owners.lock();
        if owners
            .get(&self.key)
            .is_some_and(|owner| owner.session_id == self.session_id)
        {
            owners.remove(&self.key);
            tracing::trace!(key = %self.key, "transfer lock released");
        }
    }
}

type MutexMap = HashMap<String, Arc<Mutex<()>>>;

/// Lazily-created mutexes keyed by name.
#[derive(Debug, Clone, Default)]
pub struct NamedMutexes {
    entries: Arc<Mutex<MutexMap>>,
}

impl NamedMutexes {
    /// Create an empty family.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the mutex called `name` is held.
    #[must_use]
    pub fn lock(&self, name: &str) -> NamedGuard {
        let mutex = Arc::clone(
            self.entries
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        NamedGuard {
            guard: Some(mutex.lock_arc()),
            entries: Arc::clone(&self.entries),
            name: name.to_string(),
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entry is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A held named mutex; the entry is evicted when the last user drops.
pub struct NamedGuard {
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    entries: Arc<Mutex<MutexMap>>,
    name: String,
}

impl fmt::Debug for NamedGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedGuard").field("name", &self.name).finish()
    }
}

impl Drop for NamedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.entries.lock();
        // Only the registry's own handle left: nobody holds or waits on it.
        if entries
            .get(&self.name)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            entries.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn owner(user: &str) -> LockOwner {
        LockOwner {
            session_id: SessionId::generate(),
            user: user.to_string(),
            version: "6.0".to_string(),
            host: "10.0.0.1".to_string(),
            port: 800,
        }
    }

    #[test]
    fn second_owner_is_rejected_until_release() {
        let locks = TransferLocks::new();
        let key = UniqueKey::new(false, "dest", "file", None);

        let guard = locks.try_acquire(&key, owner("alice")).unwrap();
        let rejected = locks.try_acquire(&key, owner("bob")).unwrap_err();
        assert_eq!(rejected.user, "alice");
        assert_eq!(rejected.to_string(), "alice (6.0) from 10.0.0.1:800");
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
        let _guard = locks.try_acquire(&key, owner("bob")).unwrap();
        assert_eq!(locks.owner(&key).unwrap().user, "bob");
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        let locks = TransferLocks::new();
        let key = UniqueKey::new(false, "dest", "file", None);
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let key = key.clone();
                let winners = Arc::clone(&winners);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let result = locks.try_acquire(&key, owner("u"));
                    if result.is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Keep every winner's guard alive until all attempts are done.
                    barrier.wait();
                    drop(result);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn named_mutexes_are_exclusive_and_evicted() {
        let mutexes = NamedMutexes::new();
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let mutexes = mutexes.clone();
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let _guard = mutexes.lock("stream");
                    counter.lock().push(("enter", i));
                    thread::sleep(std::time::Duration::from_millis(5));
                    counter.lock().push(("leave", i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = counter.lock();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "leave");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert!(mutexes.is_empty());
    }

    #[test]
    fn distinct_names_do_not_block() {
        let mutexes = NamedMutexes::new();
        let _a = mutexes.lock("a");
        let _b = mutexes.lock("b");
        assert_eq!(mutexes.len(), 2);
    }
}
