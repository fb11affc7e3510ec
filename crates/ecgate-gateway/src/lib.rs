//! TCP front-end of the ecgate dissemination gateway.
//!
//! This crate accepts producer connections and runs one session per
//! connection on top of the admission coordinator. It handles:
//!
//! - Configuration loading and seeding of destinations and movers
//! - Per-connection session tasks with an idle timeout
//! - Periodic refresh of the mover cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Producers (line protocol)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ecgate-gateway                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Accept    │ │  Session    │ │    Mover cache      │    │
//! │  │    loop     │ │   tasks     │ │    refresh          │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  ecgate-control over  │
//!                  │  ecgate-store (Rocks) │
//!                  └───────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ecgate_gateway::{GatewayConfig, GatewayServer, GatewayState};
//! use ecgate_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::default();
//! let store = Arc::new(RocksStore::open(&config.data_dir)?);
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//!
//! let state = GatewayState::new(store, config);
//! state.seed()?;
//! GatewayServer::new(state).run(listener).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use server::GatewayServer;
pub use state::GatewayState;
