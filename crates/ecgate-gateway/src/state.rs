//! Gateway application state.
//!
//! This module defines the state shared by the listener, the connection
//! tasks and the mover refresh task.

use std::sync::Arc;

use ecgate_control::Coordinator;
use ecgate_store::Store;

use crate::config::GatewayConfig;
use crate::error::Result;

/// Shared application state for the gateway.
pub struct GatewayState<S: Store> {
    /// The admission coordinator.
    pub coordinator: Arc<Coordinator<S>>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<S: Store + 'static> GatewayState<S> {
    /// Create the state over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, config: GatewayConfig) -> Self {
        let coordinator = Arc::new(Coordinator::new(store, config.control.clone()));
        Self {
            coordinator,
            config,
        }
    }
}

impl<S: Store> GatewayState<S> {
    /// Write the configured destinations and movers, then load the mover cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn seed(&self) -> Result<usize> {
        let store = self.coordinator.store();
        for destination in &self.config.destinations {
            store.put_destination(destination)?;
            tracing::debug!(destination = %destination.name, "destination seeded");
        }
        for mover in &self.config.movers {
            store.put_mover(mover)?;
            tracing::debug!(mover = %mover.name, host = %mover.host, port = mover.port, "mover seeded");
        }
        Ok(self.coordinator.refresh_movers()?)
    }
}

impl<S: Store> Clone for GatewayState<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            config: self.config.clone(),
        }
    }
}
