//! TCP front-end.
//!
//! Every accepted connection gets its own task running a [`Session`]; replies
//! are written by a second task fed through a channel. A background task
//! reloads the mover cache until the server is shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use ecgate_control::{Flow, Reply, Session};
use ecgate_store::Store;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::state::GatewayState;

/// Replies buffered per connection before the session waits for the socket.
const REPLY_BUFFER: usize = 256;

/// The gateway server.
pub struct GatewayServer<S: Store> {
    state: GatewayState<S>,
    cancel: CancellationToken,
}

impl<S: Store + 'static> GatewayServer<S> {
    /// Creates a server over the given state.
    #[must_use]
    pub fn new(state: GatewayState<S>) -> Arc<Self> {
        Arc::new(Self {
            state,
            cancel: CancellationToken::new(),
        })
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &GatewayState<S> {
        &self.state
    }

    /// Gracefully shuts down the server and its sessions.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serves connections from `listener` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "gateway listening");
        let refresh = self.spawn_mover_refresh();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("gateway shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer).await {
                                    tracing::error!(%peer, error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                        }
                    }
                }
            }
        }

        if let Err(e) = refresh.await {
            tracing::warn!(error = %e, "mover refresh task ended abnormally");
        }
        Ok(())
    }

    fn spawn_mover_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(server.state.config.mover_refresh());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = server.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match server.state.coordinator.refresh_movers() {
                            Ok(movers) => tracing::trace!(movers, "mover cache refreshed"),
                            Err(e) => tracing::warn!(error = %e, "mover cache refresh failed"),
                        }
                    }
                }
            }
        })
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(REPLY_BUFFER);
        let writer = tokio::spawn(write_replies(writer, rx));
        let mut session = Session::new(Arc::clone(&self.state.coordinator), peer, tx);
        tracing::debug!(session_id = %session.id(), %peer, "session opened");

        let idle = self.state.config.socket_timeout();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = self.cancel.cancelled() => None,
                read = tokio::time::timeout(idle, reader.read_line(&mut line)) => Some(read),
            };
            match read {
                None => break,
                Some(Err(_)) => {
                    tracing::warn!(session_id = %session.id(), %peer, "session idle, closing");
                    break;
                }
                Some(Ok(Err(e))) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "read failed");
                    break;
                }
                Some(Ok(Ok(0))) => break,
                Some(Ok(Ok(_))) => {
                    if session.handle(&line).await == Flow::Close {
                        break;
                    }
                }
            }
        }

        tracing::debug!(session_id = %session.id(), state = ?session.state(), "session closed");
        drop(session);
        writer.await.map_err(std::io::Error::other)??;
        Ok(())
    }
}

async fn write_replies(writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Reply>) -> std::io::Result<()> {
    let mut writer = BufWriter::new(writer);
    while let Some(reply) = rx.recv().await {
        writer.write_all(format!("{reply}\n").as_bytes()).await?;
        if rx.is_empty() {
            writer.flush().await?;
        }
    }
    writer.flush().await?;
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use ecgate_relay::mock::{MockMover, MoverScript};
    use ecgate_relay::{GatewayClient, Notification, PutRequest};
    use ecgate_store::{Destination, Mover, RocksStore, StatusCode};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct Running {
        server: Arc<GatewayServer<RocksStore>>,
        store: Arc<RocksStore>,
        addr: SocketAddr,
        handle: JoinHandle<Result<()>>,
        _dir: TempDir,
    }

    async fn start(movers: Vec<Mover>, socket_timeout_seconds: u64) -> Running {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mut config = GatewayConfig {
            socket_timeout_seconds,
            destinations: vec![Destination::new("dest")],
            movers,
            ..GatewayConfig::default()
        };
        config.control.check_port = false;
        let state = GatewayState::new(Arc::clone(&store), config);
        state.seed().unwrap();
        let server = GatewayServer::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run(listener).await })
        };
        Running {
            server,
            store,
            addr,
            handle,
            _dir: dir,
        }
    }

    fn mover(mock: &MockMover) -> Mover {
        let address = mock.address();
        Mover {
            name: mock.name().to_string(),
            host: address.host,
            port: address.port,
            transfer_group: "default".into(),
            active: true,
        }
    }

    fn put_request() -> PutRequest {
        PutRequest {
            destination: "dest".into(),
            original: Some("/data/in/file.grib".into()),
            target: Some("out/file.grib".into()),
            size: Some(5),
            metadata: Some("stream=oper,time=12".into()),
            ..PutRequest::default()
        }
    }

    #[tokio::test]
    async fn push_through_gateway_and_mover() {
        let mock = MockMover::start("m1", MoverScript::Accept).await.unwrap();
        let running = start(vec![mover(&mock)], 60).await;

        let client = GatewayClient::new(running.addr, "6.7.0", "alice").with_timeout(Duration::from_secs(5));
        let outcome = client
            .put(&put_request(), || async { Ok(&b"hello"[..]) })
            .await
            .unwrap();
        assert!(outcome.message.starts_with("1 DataTransfer(s) will start at: "));

        let received = mock.received().await;
        assert_eq!(received[0].payload, b"hello");
        assert!(received[0].target.ends_with(&format!("/{}", outcome.data_file_id)));

        let data_file = running.store.get_data_file(outcome.data_file_id).unwrap().unwrap();
        assert_eq!(data_file.get_host.as_deref(), Some("m1"));
        assert_eq!(data_file.size, 5);
        let transfers = running.store.list_transfers_by_data_file(outcome.data_file_id).unwrap();
        assert_eq!(transfers[0].status, StatusCode::Wait);

        let err = client
            .put(&put_request(), || async { Ok(&b"hello"[..]) })
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Duplicate DataFile found with 1 DataTransfer(s)"));

        running.server.shutdown();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failing_movers_mark_the_transfer_failed() {
        let mock = MockMover::start("m1", MoverScript::Refuse("disk full".into())).await.unwrap();
        let running = start(vec![mover(&mock)], 60).await;

        let client = GatewayClient::new(running.addr, "6.7.0", "alice").with_timeout(Duration::from_secs(5));
        let err = client
            .put(&put_request(), || async { Ok(&b"hello"[..]) })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error during transmission to group default (Transmission failed to each Data Mover)"
        );
        let transfers = running.store.list_transfers_by_destination("dest").unwrap();
        assert_eq!(transfers[0].status, StatusCode::Fail);
        assert!(transfers[0].deleted);
        assert!(running.server.state().coordinator.locks().is_empty());
    }

    #[tokio::test]
    async fn notifications_and_pull_mode() {
        let running = start(vec![], 60).await;
        let client = GatewayClient::new(running.addr, "6.7.0 (acquisition)", "ops")
            .with_timeout(Duration::from_secs(5));
        let message = client
            .notify(Notification::Expected, "stream=oper,time=00,step=6", Some("20240101060000"))
            .await
            .unwrap();
        assert_eq!(message, "Product status created as Expected (ProductId=1)");

        // No mover registered
        let client = GatewayClient::new(running.addr, "6.7.0", "alice").with_timeout(Duration::from_secs(5));
        let err = client
            .put(&put_request(), || async { Ok(&b""[..]) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No Data Mover available for transfer group default");
    }

    #[tokio::test]
    async fn idle_sessions_are_closed() {
        let running = start(vec![], 1).await;
        let mut stream = TcpStream::connect(running.addr).await.unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn raw_protocol_errors() {
        let running = start(vec![], 60).await;
        let mut stream = TcpStream::connect(running.addr).await.unwrap();
        stream.write_all(b"VERSION 1.0\r\nHELLO\r\n").await.unwrap();
        let mut buf = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, "+VERSION 1.0\n-Unknown command HELLO\n");
    }
}
