//! Admission coordinator for the ecgate dissemination gateway.
//!
//! This crate holds the session protocol and everything a `PUT` goes through
//! before the bytes reach a mover: override resolution against destination
//! policies, unique-key locking, the transfer status state machine and the
//! product-status notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Gateway (TCP listener)                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ lines
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Session                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Admission  │ │ Overrides & │ │ Lifecycle, locks &  │    │
//! │  │  & aliases  │ │  metadata   │ │ notifications       │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌───────────┐
//!        │  Store   │   │  Movers  │   │ Scheduler │
//!        │ (RocksDB)│   │  cache   │   │  control  │
//!        └──────────┘   └──────────┘   └───────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ecgate_control::{Coordinator, Flow, Session};
//! use ecgate_store::RocksStore;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/ecgate")?);
//! let coordinator = Arc::new(Coordinator::with_defaults(store));
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let mut session = Session::new(coordinator, "127.0.0.1:800".parse()?, tx);
//! if session.handle("USER alice").await == Flow::Continue {
//!     if let Some(reply) = rx.recv().await {
//!         println!("{reply}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Transfer statuses
//!
//! See the [`lifecycle`] module for the transitions a transfer may take.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod aliases;
pub mod arrival;
pub mod error;
pub mod groups;
pub mod lifecycle;
pub mod locks;
pub mod metadata;
pub mod movers;
pub mod notification;
pub mod overrides;
pub mod request;
pub mod request_log;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod types;

pub use admission::{Admission, Admitted, Requester};
pub use arrival::{predict, predict_transfer, ArrivalPrediction, ArrivalSample, Timeliness};
pub use error::{ControlError, ErrorKind, Result};
pub use request::PendingRequest;
pub use scheduler::{LocalScheduler, SchedulerStatus, TransferScheduler};
pub use service::Coordinator;
pub use session::{Flow, Reply, Session, SessionState};
pub use types::ControlConfig;

// Re-export commonly used types from dependencies for convenience
pub use ecgate_core::{DataFileId, SessionId, TransferId, UniqueKey};
pub use ecgate_store::{DataFile, DataTransfer, Destination, StatusCode};
