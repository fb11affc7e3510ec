//! Read-mostly cache of the mover directory.
//!
//! The gateway refreshes the cache on a timer; readers take a snapshot of the
//! current list without holding the lock across any I/O.

use std::sync::Arc;

use ecgate_store::{Mover, Store};
use parking_lot::RwLock;

use crate::error::Result;

/// Snapshot cache of the movers known to the repository.
#[derive(Debug, Default)]
pub struct MoverCache {
    movers: RwLock<Arc<Vec<Mover>>>,
}

impl MoverCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the directory from the repository and swap it in.
    ///
    /// Returns the number of movers loaded.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the previous snapshot stays in place.
    pub fn refresh<S: Store + ?Sized>(&self, store: &S) -> Result<usize> {
        let movers = store.list_movers()?;
        let count = movers.len();
        *self.movers.write() = Arc::new(movers);
        tracing::debug!(movers = count, "mover directory refreshed");
        Ok(count)
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Mover>> {
        Arc::clone(&self.movers.read())
    }

    /// Active movers of a transfer group, in directory order.
    #[must_use]
    pub fn candidates(&self, transfer_group: &str) -> Vec<Mover> {
        self.snapshot()
            .iter()
            .filter(|mover| mover.active && mover.transfer_group == transfer_group)
            .cloned()
            .collect()
    }
}

/// The `|`-delimited `host:port` list sent in the `ECPROXY` reply.
#[must_use]
pub fn format_list(movers: &[Mover]) -> String {
    movers
        .iter()
        .map(Mover::address)
        .collect::<Vec<_>>()
        .join("|")
}
