//! Control interface of the transfer and download schedulers.
//!
//! Scheduling itself happens downstream. Sessions only toggle destination
//! states and pause or tune the download scheduler through [`TransferScheduler`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ecgate_store::{DestinationState, Store};
use parking_lot::Mutex;

use crate::error::{ControlError, Result};

/// Download threads of a fresh scheduler.
pub const DEFAULT_STREAMS: u32 = 10;

/// Download thread timeout of a fresh scheduler, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// State of one download scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Whether downloads are paused.
    pub paused: bool,
    /// Maximum download threads.
    pub streams: u32,
    /// Download thread timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            paused: false,
            streams: DEFAULT_STREAMS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scheduler {} (streams={},timeout={})",
            if self.paused { "stopped" } else { "started" },
            self.streams,
            self.timeout_ms
        )
    }
}

/// Trait for scheduler control.
///
/// `acquisition` selects the acquisition scheduler instead of the
/// dissemination one.
#[async_trait]
pub trait TransferScheduler: Send + Sync {
    /// Resume deliveries to a destination.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DestinationNotFound` for an unknown destination.
    async fn start_destination(&self, destination: &str) -> Result<()>;

    /// Stop deliveries to a destination.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DestinationNotFound` for an unknown destination.
    async fn stop_destination(&self, destination: &str) -> Result<()>;

    /// Pause or resume a download scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be reached.
    async fn set_paused(&self, acquisition: bool, paused: bool) -> Result<()>;

    /// Apply new limits, if any, and report the scheduler state.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be reached.
    async fn check(
        &self,
        acquisition: bool,
        streams: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<SchedulerStatus>;
}

/// In-process scheduler control backed by the repository.
pub struct LocalScheduler<S: Store> {
    store: Arc<S>,
    dissemination: Mutex<SchedulerStatus>,
    acquisition: Mutex<SchedulerStatus>,
}

impl<S: Store> LocalScheduler<S> {
    /// Scheduler control over `store`, both schedulers running.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            dissemination: Mutex::new(SchedulerStatus::default()),
            acquisition: Mutex::new(SchedulerStatus::default()),
        }
    }

    fn scheduler(&self, acquisition: bool) -> &Mutex<SchedulerStatus> {
        if acquisition {
            &self.acquisition
        } else {
            &self.dissemination
        }
    }

    fn set_destination_state(&self, name: &str, state: DestinationState) -> Result<()> {
        let mut destination = self
            .store
            .get_destination(name)?
            .ok_or_else(|| ControlError::DestinationNotFound(name.to_string()))?;
        destination.state = state;
        self.store.put_destination(&destination)?;
        tracing::info!(destination = %name, state = ?state, "destination state changed");
        Ok(())
    }
}

#[async_trait]
impl<S: Store + 'static> TransferScheduler for LocalScheduler<S> {
    async fn start_destination(&self, destination: &str) -> Result<()> {
        self.set_destination_state(destination, DestinationState::Running)
    }

    async fn stop_destination(&self, destination: &str) -> Result<()> {
        self.set_destination_state(destination, DestinationState::Stopped)
    }

    async fn set_paused(&self, acquisition: bool, paused: bool) -> Result<()> {
        self.scheduler(acquisition).lock().paused = paused;
        tracing::info!(acquisition, paused, "download scheduler updated");
        Ok(())
    }

    async fn check(
        &self,
        acquisition: bool,
        streams: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<SchedulerStatus> {
        let mut status = self.scheduler(acquisition).lock();
        if let Some(streams) = streams {
            status.streams = streams;
        }
        if let Some(timeout_ms) = timeout_ms {
            status.timeout_ms = timeout_ms;
        }
        Ok(*status)
    }
}
