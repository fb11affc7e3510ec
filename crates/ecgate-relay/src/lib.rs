//! Client side of the ecgate relay.
//!
//! A push goes through two hops: the client negotiates the admission with
//! the gateway, which answers with a storage path and an ordered list of
//! movers; the client then streams the payload to the first mover that
//! accepts it and reports the mover's `STAT` token back to the gateway.
//!
//! # Wire format
//!
//! See the [`wire`] module for the line framing and the [`mover`] module
//! for the mover handshake.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod mover;
pub mod wire;

pub use client::{data_file_id, GatewayClient, Notification, PutOutcome, PutRequest};
pub use error::{RelayError, Result};
pub use mover::{parse_candidates, relay, send_to_mover, Delivery, MoverAddress, Upload};

use std::time::Duration;

/// Socket buffer size (256 KB).
pub const BUFFER_SIZE: usize = 256 * 1024;

/// Default timeout for connecting and for each reply.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
