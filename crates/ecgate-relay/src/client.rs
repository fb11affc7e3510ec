//! Gateway hop: push files and send notifications to an ecgate gateway.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use ecgate_core::DataFileId;
use tokio::io::AsyncRead;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{RelayError, Result};
use crate::mover::{parse_candidates, relay, Delivery, Upload};
use crate::wire::Wire;
use crate::CONNECT_TIMEOUT;

const FROM_PREFIX: &str = "From the ecpds command at ";

/// Attributes of a `PUT`, sent in this order before the verb.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    /// `DESTINATION`
    pub destination: String,
    /// `TIMEFILE`, in seconds.
    pub time_file: Option<i64>,
    /// `SIZE`, when known.
    pub size: Option<u64>,
    /// `AT`
    pub at: Option<String>,
    /// `ORIGINAL`
    pub original: Option<String>,
    /// `METADATA`
    pub metadata: Option<String>,
    /// `HOSTFORACQUISITION`
    pub host_for_acquisition: Option<String>,
    /// `SOURCE`
    pub source: Option<String>,
    /// `UNIQUENAME`
    pub unique_name: Option<String>,
    /// `TARGET`
    pub target: Option<String>,
    /// `STANDBY`
    pub standby: bool,
    /// `ASAP`
    pub asap: bool,
    /// `EVENT`
    pub event: bool,
    /// `PRIORITY`
    pub priority: Option<u8>,
    /// `IDENTITY`
    pub identity: Option<String>,
    /// `LIFETIME`
    pub lifetime: Option<String>,
    /// `GROUPBY`; set for pull mode.
    pub group_by: Option<String>,
    /// `GROUP`
    pub transfer_group: Option<String>,
    /// `CALLER`
    pub caller: Option<String>,
    /// `INDEX`
    pub index: Option<u32>,
    /// `NORETRIEVAL`
    pub no_retrieval: bool,
    /// `FORCE`
    pub force: bool,
    /// `REQUEUE`
    pub requeue: bool,
}

/// Outcome of a `PUT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Data file created or updated.
    pub data_file_id: DataFileId,
    /// Final gateway message.
    pub message: String,
    /// Mover hop details, for push mode.
    pub delivery: Option<Delivery>,
}

/// Product notification verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// `EXPECTED`
    Expected,
    /// `STARTED`
    Started,
    /// `COMPLETED`
    Completed,
}

impl Notification {
    const fn verb(self) -> &'static str {
        match self {
            Self::Expected => "EXPECTED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
        }
    }
}

/// Client of one gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    addr: SocketAddr,
    version: String,
    user: String,
    from: Option<String>,
    fake_write: bool,
    timeout: Duration,
}

type Connection = Wire<OwnedReadHalf, OwnedWriteHalf>;

impl GatewayClient {
    /// Create a client announcing `version` and logging in as `user`.
    #[must_use]
    pub fn new(addr: SocketAddr, version: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            addr,
            version: version.into(),
            user: user.into(),
            from: None,
            fake_write: false,
            timeout: CONNECT_TIMEOUT,
        }
    }

    /// Origin sent with `FROM`.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Ask movers to discard the bytes.
    #[must_use]
    pub const fn with_fake_write(mut self, fake_write: bool) -> Self {
        self.fake_write = fake_write;
        self
    }

    /// Connect and reply timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn login(&self) -> Result<Connection> {
        let mut wire = Wire::connect(self.addr, self.timeout).await?;
        wire.send(&format!("VERSION {}", self.version)).await?;
        wire.expect(Some("VERSION")).await?;
        wire.send_opt("FROM", self.from.as_deref()).await?;
        wire.send(&format!("USER {}", self.user)).await?;
        let welcome = wire.expect(Some("MESSAGE")).await?;
        tracing::debug!(addr = %self.addr, welcome = %welcome, "logged in");
        Ok(wire)
    }

    /// Admit a file; in push mode the payload is relayed to the movers.
    ///
    /// `open` is called once per mover attempt.
    ///
    /// # Errors
    ///
    /// Returns the gateway rejection, `RelayError::AllMoversFailed` after
    /// reporting it to the gateway, or an I/O error.
    pub async fn put<F, Fut, P>(&self, request: &PutRequest, open: F) -> Result<PutOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<P>>,
        P: AsyncRead + Unpin,
    {
        let mut wire = self.login().await?;
        let remote_ip = self
            .from
            .as_deref()
            .and_then(|from| from.strip_prefix(FROM_PREFIX))
            .unwrap_or("-");
        wire.send(&format!("REMOTEIP {remote_ip}")).await?;
        wire.send(&format!("DESTINATION {}", request.destination)).await?;
        wire.send_opt("TIMEFILE", request.time_file).await?;
        wire.send_opt("SIZE", request.size).await?;
        wire.send_opt("AT", request.at.as_deref()).await?;
        wire.send_opt("ORIGINAL", request.original.as_deref()).await?;
        wire.send_opt("METADATA", request.metadata.as_deref()).await?;
        wire.send_opt("HOSTFORACQUISITION", request.host_for_acquisition.as_deref())
            .await?;
        wire.send_opt("SOURCE", request.source.as_deref()).await?;
        wire.send_opt("UNIQUENAME", request.unique_name.as_deref()).await?;
        wire.send_opt("TARGET", request.target.as_deref()).await?;
        wire.send(&format!("STANDBY {}", request.standby)).await?;
        wire.send(&format!("ASAP {}", request.asap)).await?;
        wire.send(&format!("EVENT {}", request.event)).await?;
        wire.send_opt("PRIORITY", request.priority).await?;
        wire.send_opt("IDENTITY", request.identity.as_deref()).await?;
        wire.send_opt("LIFETIME", request.lifetime.as_deref()).await?;
        wire.send_opt("GROUPBY", request.group_by.as_deref()).await?;
        wire.send_opt("GROUP", request.transfer_group.as_deref()).await?;
        wire.send_opt("CALLER", request.caller.as_deref()).await?;
        wire.send_opt("INDEX", request.index.filter(|i| *i > 0)).await?;
        wire.send(&format!("NORETRIEVAL {}", request.no_retrieval)).await?;
        wire.send(&format!("FORCE {}", request.force)).await?;
        if request.requeue {
            wire.send("REQUEUE true").await?;
        }
        wire.send("PUT").await?;

        let delivery = if request.group_by.is_some() {
            None
        } else {
            Some(self.relay(&mut wire, request.size, open).await?)
        };
        let message = wire.expect(Some("MESSAGE")).await?;
        let data_file_id = data_file_id(&message)?;
        tracing::info!(%data_file_id, destination = %request.destination, "file admitted");
        Ok(PutOutcome {
            data_file_id,
            message,
            delivery,
        })
    }

    async fn relay<F, Fut, P>(&self, wire: &mut Connection, size: Option<u64>, open: F) -> Result<Delivery>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<P>>,
        P: AsyncRead + Unpin,
    {
        let target = wire.expect(Some("TARGET")).await?;
        let movers = wire.expect(Some("ECPROXY")).await?;
        if wire.expect(None).await? != "Please continue" {
            let message = "Unexpected reply from master";
            wire.send(&format!("-{message}")).await?;
            return Err(RelayError::Rejected(message.to_string()));
        }
        let upload = Upload {
            version: self.version.clone(),
            target,
            size,
            fake_write: self.fake_write,
            timeout: self.timeout,
        };
        match relay(&parse_candidates(&movers), &upload, open).await {
            Ok(delivery) => {
                wire.send(&format!("HOST {}", delivery.stat)).await?;
                wire.send(&format!("SIZE {}", delivery.bytes)).await?;
                wire.send("BYE").await?;
                Ok(delivery)
            }
            Err(e) => {
                wire.send(&format!("-{e}")).await?;
                // The gateway answers with the recorded failure
                Err(match wire.expect(Some("MESSAGE")).await {
                    Err(RelayError::Rejected(reason)) => RelayError::Rejected(reason),
                    _ => e,
                })
            }
        }
    }

    /// Send a product notification; returns the gateway message.
    ///
    /// # Errors
    ///
    /// Returns the gateway rejection or an I/O error.
    pub async fn notify(&self, kind: Notification, metadata: &str, at: Option<&str>) -> Result<String> {
        let mut wire = Wire::connect(self.addr, self.timeout).await?;
        wire.send(&format!("VERSION {}", self.version)).await?;
        wire.expect(Some("VERSION")).await?;
        wire.send(&format!("METADATA \"{metadata}\"")).await?;
        if kind == Notification::Expected {
            wire.send_opt("AT", at).await?;
        }
        wire.send(kind.verb()).await?;
        wire.expect(Some("MESSAGE")).await
    }

    /// Wait until a pull group is retrieved; `progress` sees every
    /// intermediate line. Returns the completion line.
    ///
    /// # Errors
    ///
    /// Returns the gateway rejection or an I/O error.
    pub async fn wait_for_group(&self, group: &str, mut progress: impl FnMut(&str)) -> Result<String> {
        let mut wire = self.login().await?;
        wire.send(&format!("WAITFORGROUP {group}")).await?;
        let mut last = None;
        loop {
            let line = wire.expect(None).await?;
            if line == "QUIT" {
                break;
            }
            progress(&line);
            last = Some(line);
        }
        last.ok_or(RelayError::ConnectionClosed)
    }
}

/// Extract the `(DatafileId=<id>)` of a gateway message.
///
/// # Errors
///
/// Returns `RelayError::NoDataFileId` carrying the message otherwise.
pub fn data_file_id(message: &str) -> Result<DataFileId> {
    const MARKER: &str = "(DatafileId=";
    message
        .find(MARKER)
        .map(|start| &message[start + MARKER.len()..])
        .and_then(|rest| rest.split_once(')'))
        .and_then(|(id, _)| id.parse::<u64>().ok())
        .map(DataFileId::new)
        .ok_or_else(|| RelayError::NoDataFileId(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMover, MoverScript};
    use tokio::net::TcpListener;

    #[test]
    fn data_file_ids() {
        let id = data_file_id("1 DataTransfer(s) will start at: now (DatafileId=42) (updated)").unwrap();
        assert_eq!(id, DataFileId::new(42));
        assert!(data_file_id("Destination x not found (metadata ignored)").is_err());
        assert!(data_file_id("(DatafileId=x)").is_err());
    }

    /// Scripted gateway: checks every received line against `expect` and
    /// writes `reply` lines after the verbs listed there.
    async fn scripted_gateway(script: Vec<(&'static str, Vec<String>)>) -> (SocketAddr, JoinHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, writer) = stream.into_split();
            let mut wire = Wire::new(reader, writer, Duration::from_secs(5));
            let mut seen = Vec::new();
            for (until, replies) in script {
                loop {
                    let line = wire.recv_line().await.unwrap().unwrap();
                    seen.push(line.clone());
                    if line.starts_with(until) {
                        break;
                    }
                }
                for reply in replies {
                    wire.send(&reply).await.unwrap();
                }
            }
            seen
        });
        (addr, handle)
    }

    type JoinHandle = tokio::task::JoinHandle<Vec<String>>;

    #[tokio::test]
    async fn push_through_a_mover() {
        let mover = MockMover::start("m1", MoverScript::Accept).await.unwrap();
        let (addr, gateway) = scripted_gateway(vec![
            ("VERSION", vec!["+VERSION 1.0".into()]),
            ("USER", vec!["+MESSAGE welcome ops@127.0.0.1".into()]),
            (
                "PUT",
                vec![
                    "+TARGET /default/20240101/7".into(),
                    format!("+ECPROXY 127.0.0.1:1|{}", mover.address()),
                    "+Please continue".into(),
                ],
            ),
            (
                "BYE",
                vec!["+MESSAGE 1 DataTransfer(s) will start at: now (DatafileId=7)".into()],
            ),
        ])
        .await;

        let client = GatewayClient::new(addr, "1.0", "ops")
            .with_from("From the ecpds command at 10.1.1.1")
            .with_timeout(Duration::from_secs(5));
        let request = PutRequest {
            destination: "dest".into(),
            original: Some("/data/a.grib".into()),
            target: Some("a.grib".into()),
            size: Some(3),
            ..PutRequest::default()
        };
        let outcome = client.put(&request, || async { Ok(&b"abc"[..]) }).await.unwrap();
        assert_eq!(outcome.data_file_id, DataFileId::new(7));
        assert_eq!(outcome.delivery.as_ref().unwrap().bytes, 3);

        let seen = gateway.await.unwrap();
        assert_eq!(seen[0], "VERSION 1.0");
        assert_eq!(seen[1], "FROM From the ecpds command at 10.1.1.1");
        assert!(seen.contains(&"REMOTEIP 10.1.1.1".to_string()));
        assert!(seen.iter().any(|l| l.starts_with("HOST +(m1|")));
        assert!(seen.contains(&"SIZE 3".to_string()));
        assert_eq!(mover.received().await[0].target, "/default/20240101/7");
    }

    #[tokio::test]
    async fn movers_all_failing_are_reported() {
        let (addr, gateway) = scripted_gateway(vec![
            ("VERSION", vec!["+VERSION 1.0".into()]),
            ("USER", vec!["+MESSAGE welcome ops@127.0.0.1".into()]),
            (
                "PUT",
                vec![
                    "+TARGET /default/20240101/7".into(),
                    "+ECPROXY 127.0.0.1:1".into(),
                    "+Please continue".into(),
                ],
            ),
            (
                "-",
                vec!["-Error during transmission to group default (Transmission failed to each Data Mover)".into()],
            ),
        ])
        .await;
        let client = GatewayClient::new(addr, "1.0", "ops").with_timeout(Duration::from_secs(5));
        let request = PutRequest {
            destination: "dest".into(),
            original: Some("/a".into()),
            ..PutRequest::default()
        };
        let err = client
            .put(&request, || async { Ok(&b"x"[..]) })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error during transmission to group default (Transmission failed to each Data Mover)"
        );
        let seen = gateway.await.unwrap();
        assert!(seen.contains(&"REMOTEIP -".to_string()));
        assert_eq!(seen.last().unwrap(), "-Transmission failed to each Data Mover");
    }

    #[tokio::test]
    async fn notification_and_group_wait() {
        let (addr, gateway) = scripted_gateway(vec![
            ("VERSION", vec!["+VERSION 1.0".into()]),
            (
                "EXPECTED",
                vec!["+MESSAGE Product status created as Expected (ProductId=1)".into()],
            ),
        ])
        .await;
        let client = GatewayClient::new(addr, "1.0", "ops");
        let message = client
            .notify(Notification::Expected, "stream=oper,time=00,step=0", Some("20240101000000"))
            .await
            .unwrap();
        assert_eq!(message, "Product status created as Expected (ProductId=1)");
        let seen = gateway.await.unwrap();
        assert_eq!(seen[1], "METADATA \"stream=oper,time=00,step=0\"");
        assert_eq!(seen[2], "AT 20240101000000");

        let (addr, _gateway) = scripted_gateway(vec![
            ("VERSION", vec!["+VERSION 1.0".into()]),
            ("USER", vec!["+MESSAGE welcome ops@127.0.0.1".into()]),
            (
                "WAITFORGROUP",
                vec![
                    "+now: Still 1 DataFile(s) to process for group g".into(),
                    "+Group g completed".into(),
                    "+QUIT".into(),
                ],
            ),
        ])
        .await;
        let client = GatewayClient::new(addr, "1.0", "ops");
        let mut lines = Vec::new();
        let last = client
            .wait_for_group("g", |line| lines.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(last, "Group g completed");
        assert_eq!(lines.len(), 2);
    }
}
