//! Mover hop: push a payload to the first mover that accepts it.
//!
//! ```text
//! client                                  mover
//!   ECPDS <version>               ──▶
//!   [OPTS ecproxy.fakeWrite=yes]  ──▶
//!   TARGET <path>                 ──▶
//!                                 ◀──  +CONNECT
//!   SIZE <n|-1>                   ──▶
//!   <raw bytes>                   ──▶
//!   [shutdown when size is -1]
//!                                 ◀──  +STAT <token>
//!                                 ◀──  +BYE
//!   BYE                           ──▶   (only when the size was declared)
//! ```

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::{RelayError, Result};
use crate::wire::Wire;

/// One `host:port` entry of an `ECPROXY` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverAddress {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl MoverAddress {
    async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| RelayError::InvalidMover(self.to_string()))
    }
}

impl fmt::Display for MoverAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for MoverAddress {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidMover(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| RelayError::InvalidMover(s.to_string()))?;
        if host.is_empty() {
            return Err(RelayError::InvalidMover(s.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Parse a `|`-delimited candidate list, skipping malformed entries.
#[must_use]
pub fn parse_candidates(list: &str) -> Vec<MoverAddress> {
    list.split('|')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(address) => Some(address),
            Err(e) => {
                tracing::warn!(entry, error = %e, "ignoring mover candidate");
                None
            }
        })
        .collect()
}

/// What to send to a mover.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client version announced on the `ECPDS` line.
    pub version: String,
    /// Storage path returned by the gateway.
    pub target: String,
    /// Declared payload size, `None` when unknown.
    pub size: Option<u64>,
    /// Ask the mover to discard the bytes.
    pub fake_write: bool,
    /// Connect and reply timeout.
    pub timeout: Duration,
}

/// Result of a successful relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The mover that stored the payload.
    pub mover: MoverAddress,
    /// Opaque token from the `STAT` reply.
    pub stat: String,
    /// Bytes sent.
    pub bytes: u64,
}

/// Push the payload to one mover.
///
/// # Errors
///
/// Returns any connection, protocol or I/O failure.
pub async fn send_to_mover<P>(mover: &MoverAddress, upload: &Upload, source: &mut P) -> Result<Delivery>
where
    P: AsyncRead + Unpin,
{
    let addr = mover.resolve().await?;
    let mut wire = Wire::connect(addr, upload.timeout).await?;
    wire.send(&format!("ECPDS {}", upload.version)).await?;
    if upload.fake_write {
        wire.send("OPTS ecproxy.fakeWrite=yes").await?;
    }
    wire.send(&format!("TARGET {}", upload.target)).await?;
    wire.expect(Some("CONNECT")).await?;
    match upload.size {
        Some(size) => wire.send(&format!("SIZE {size}")).await?,
        None => wire.send("SIZE -1").await?,
    }
    let bytes = wire.send_payload(source).await?;
    if upload.size.is_none() {
        wire.shutdown().await?;
    }
    tracing::debug!(mover = %mover, bytes, "payload sent");
    let stat = wire.expect(Some("STAT")).await?;
    wire.expect(Some("BYE")).await?;
    if upload.size.is_some() {
        wire.send("BYE").await?;
    }
    Ok(Delivery {
        mover: mover.clone(),
        stat,
        bytes,
    })
}

/// Try each candidate in order until one stores the payload.
///
/// `open` is called once per attempt so that every candidate gets the whole
/// payload.
///
/// # Errors
///
/// Returns `RelayError::AllMoversFailed` when no candidate succeeds.
pub async fn relay<F, Fut, P>(candidates: &[MoverAddress], upload: &Upload, mut open: F) -> Result<Delivery>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<P>>,
    P: AsyncRead + Unpin,
{
    for (attempt, mover) in candidates.iter().enumerate() {
        let outcome = match open().await {
            Ok(mut source) => send_to_mover(mover, upload, &mut source).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(delivery) => {
                tracing::info!(mover = %mover, attempt, bytes = delivery.bytes, "relayed to mover");
                return Ok(delivery);
            }
            Err(e) => {
                tracing::warn!(mover = %mover, attempt, error = %e, "mover failed, trying next");
            }
        }
    }
    Err(RelayError::AllMoversFailed)
}
