//! The admission coordinator.
//!
//! One [`Coordinator`] is shared by every session of the gateway. It owns the
//! process-wide state: the repository handle, the configuration, both lock
//! families, the mover cache and the scheduler control.

use std::sync::Arc;

use ecgate_store::Store;

use crate::locks::{NamedMutexes, TransferLocks};
use crate::movers::MoverCache;
use crate::scheduler::{LocalScheduler, TransferScheduler};
use crate::types::ControlConfig;

/// Process-scoped state shared by all sessions.
pub struct Coordinator<S: Store> {
    store: Arc<S>,
    config: ControlConfig,
    locks: TransferLocks,
    metadata_mutexes: NamedMutexes,
    product_mutexes: NamedMutexes,
    movers: Arc<MoverCache>,
    scheduler: Arc<dyn TransferScheduler>,
}

impl<S: Store + 'static> Coordinator<S> {
    /// Create a coordinator with in-process scheduler control.
    #[must_use]
    pub fn new(store: Arc<S>, config: ControlConfig) -> Self {
        let scheduler = Arc::new(LocalScheduler::new(Arc::clone(&store)));
        Self::with_scheduler(store, config, scheduler)
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ControlConfig::default())
    }
}

impl<S: Store> Coordinator<S> {
    /// Create a coordinator with an external scheduler control.
    #[must_use]
    pub fn with_scheduler(
        store: Arc<S>,
        config: ControlConfig,
        scheduler: Arc<dyn TransferScheduler>,
    ) -> Self {
        Self {
            store,
            config,
            locks: TransferLocks::new(),
            metadata_mutexes: NamedMutexes::new(),
            product_mutexes: NamedMutexes::new(),
            movers: Arc::new(MoverCache::new()),
            scheduler,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared handle to the store.
    #[must_use]
    pub fn store_handle(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Unique keys currently being admitted.
    #[must_use]
    pub const fn locks(&self) -> &TransferLocks {
        &self.locks
    }

    /// Mutexes guarding the first insert of a metadata attribute.
    #[must_use]
    pub const fn metadata_mutexes(&self) -> &NamedMutexes {
        &self.metadata_mutexes
    }

    /// Mutexes guarding product status updates.
    #[must_use]
    pub const fn product_mutexes(&self) -> &NamedMutexes {
        &self.product_mutexes
    }

    /// The mover directory cache.
    #[must_use]
    pub fn movers(&self) -> &Arc<MoverCache> {
        &self.movers
    }

    /// Scheduler control.
    #[must_use]
    pub fn scheduler(&self) -> &dyn TransferScheduler {
        self.scheduler.as_ref()
    }

    /// Reload the mover directory.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn refresh_movers(&self) -> crate::error::Result<usize> {
        self.movers.refresh(self.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecgate_store::{Mover, RocksStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn coordinator_wiring() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        store
            .put_mover(&Mover {
                name: "m1".into(),
                host: "127.0.0.1".into(),
                port: 9000,
                transfer_group: "default".into(),
                active: true,
            })
            .unwrap();

        let coordinator = Coordinator::with_defaults(Arc::clone(&store));
        assert!(coordinator.config().check_port);
        assert!(coordinator.locks().is_empty());
        assert!(coordinator.movers().candidates("default").is_empty());

        assert_eq!(coordinator.refresh_movers().unwrap(), 1);
        assert_eq!(coordinator.movers().candidates("default").len(), 1);

        let status = coordinator.scheduler().check(false, None, None).await.unwrap();
        assert!(!status.paused);
    }
}
