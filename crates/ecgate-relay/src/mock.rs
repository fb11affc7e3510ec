//! Scriptable in-process mover for tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::mover::MoverAddress;
use crate::wire::Wire;

/// How the mock answers a connection.
#[derive(Debug, Clone)]
pub enum MoverScript {
    /// Store the payload and reply with a `STAT` token.
    Accept,
    /// Reject the `TARGET` line with the given reason.
    Refuse(String),
    /// Acknowledge the target, then drop the connection after `SIZE`.
    DropAfterConnect,
}

/// A payload stored by the mock.
#[derive(Debug, Clone, Default)]
pub struct Received {
    /// Version from the `ECPDS` line.
    pub version: String,
    /// Storage path.
    pub target: String,
    /// Declared size, `None` for `-1`.
    pub declared_size: Option<u64>,
    /// The bytes.
    pub payload: Vec<u8>,
    /// `OPTS ecproxy.fakeWrite=yes` was sent.
    pub fake_write: bool,
    /// The client closed with `BYE`.
    pub client_bye: bool,
}

/// Names of the mocks in the order they accepted connections.
///
/// Clones share the same log, so several mocks can record into one.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog(Arc<Mutex<Vec<String>>>);

impl AttemptLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted connections so far, by mover name.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn record(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }
}

#[derive(Default)]
struct MockState {
    received: Mutex<Vec<Received>>,
    connections: AtomicUsize,
    stored: Notify,
}

/// A mover listening on `127.0.0.1`; stops when dropped.
pub struct MockMover {
    name: String,
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockMover {
    /// Bind an ephemeral port and serve connections with `script`.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn start(name: &str, script: MoverScript) -> std::io::Result<Self> {
        Self::start_logged(name, script, AttemptLog::new()).await
    }

    /// Like [`MockMover::start`], recording every accepted connection in `log`.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn start_logged(name: &str, script: MoverScript, log: AttemptLog) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::default());
        let task = {
            let state = Arc::clone(&state);
            let name = name.to_string();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    log.record(&name);
                    let state = Arc::clone(&state);
                    let script = script.clone();
                    let name = name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &name, &script, &state).await {
                            tracing::debug!(mover = %name, error = %e, "mock connection ended");
                        }
                    });
                }
            })
        };
        Ok(Self {
            name: name.to_string(),
            addr,
            state,
            task,
        })
    }

    /// Mover name used in `STAT` tokens.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address to hand out as a candidate.
    #[must_use]
    pub fn address(&self) -> MoverAddress {
        MoverAddress {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Payloads stored so far, waiting up to five seconds for the first one.
    pub async fn received(&self) -> Vec<Received> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = self.state.stored.notified();
            {
                let received = self.state.received.lock();
                if !received.is_empty() {
                    return received.clone();
                }
            }
            if tokio::time::timeout_at(deadline, stored).await.is_err() {
                return Vec::new();
            }
        }
    }
}

impl Drop for MockMover {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, name: &str, script: &MoverScript, state: &MockState) -> Result<()> {
    let started = Instant::now();
    let (reader, writer) = stream.into_split();
    let mut wire = Wire::new(reader, writer, Duration::from_secs(5));
    let mut received = Received::default();

    loop {
        let line = wire.recv_line().await?.ok_or(RelayError::ConnectionClosed)?;
        let (verb, value) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match verb {
            "ECPDS" => received.version = value.to_string(),
            "OPTS" => received.fake_write = value == "ecproxy.fakeWrite=yes",
            "TARGET" => {
                received.target = value.to_string();
                break;
            }
            _ => return Err(RelayError::BadFormat(line)),
        }
    }
    if let MoverScript::Refuse(reason) = script {
        wire.send(&format!("-{reason}")).await?;
        return Ok(());
    }
    wire.send("+CONNECT").await?;

    let line = wire.recv_line().await?.ok_or(RelayError::ConnectionClosed)?;
    let size = line
        .strip_prefix("SIZE ")
        .and_then(|size| size.trim().parse::<i64>().ok())
        .ok_or_else(|| RelayError::BadFormat(line.clone()))?;
    if matches!(script, MoverScript::DropAfterConnect) {
        return Ok(());
    }
    received.declared_size = u64::try_from(size).ok();
    wire.recv_payload(received.declared_size, &mut received.payload)
        .await?;

    let token = format!(
        "+({name}|{}|{}ms)",
        Utc::now().timestamp_millis(),
        started.elapsed().as_millis()
    );
    wire.send(&format!("+STAT {token}")).await?;
    wire.send("+BYE").await?;
    received.client_bye = matches!(wire.recv_line().await, Ok(Some(line)) if line == "BYE");

    state.received.lock().push(received);
    state.stored.notify_waiters();
    Ok(())
}
