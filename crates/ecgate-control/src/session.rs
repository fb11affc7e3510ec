//! The line-oriented command session.
//!
//! A [`Session`] consumes one client line at a time. Attribute commands fill
//! the [`PendingRequest`], terminal commands consume it. Replies are framed
//! as [`Reply`] values and pushed on the outbound channel handed to
//! [`Session::new`]; the transport only writes them out.
//!
//! # States
//!
//! ```text
//! UNAUTHENTICATED ──USER──▶ IDENTIFIED ──attribute──▶ ACCUMULATING
//!                                                        │ PUT
//!                                                        ▼
//!                                                    COMMITTING
//!                                          group-by ┌────┴────┐ push
//!                                                   ▼         ▼
//!                                              DELEGATED   RELAYING
//!                                                   │         │ BYE
//!                                                   │         ▼
//!                                                   │     FINALIZING
//!                                                   └────┬────┘
//!                                                        ▼
//!                                                      CLOSED
//! ```
//!
//! Dropping a session in `RELAYING` rolls the admission back.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use ecgate_core::SessionId;
use ecgate_store::{ProductState, Store};
use regex::Regex;
use tokio::sync::mpsc;

use crate::admission::{Admission, Admitted, Requester};
use crate::error::{ControlError, ErrorKind, Result};
use crate::request::{parse_flag, parse_size, PendingRequest};
use crate::request_log::{RequestKind, RequestRecord};
use crate::service::Coordinator;

/// Highest peer port considered privileged.
const MAX_PRIVILEGED_PORT: u16 = 1023;

/// One reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>`
    Ok(String),
    /// `-<text>`
    Err(String),
}

impl Reply {
    /// `+MESSAGE <text>`
    #[must_use]
    pub fn message(text: impl fmt::Display) -> Self {
        Self::Ok(format!("MESSAGE {text}"))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(text) => write!(f, "+{text}"),
            Self::Err(text) => write!(f, "-{text}"),
        }
    }
}

/// Whether the session goes on after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Close the connection.
    Close,
}

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No `USER` yet.
    Unauthenticated,
    /// Logged in, nothing accumulated.
    Identified,
    /// Attributes being accumulated.
    Accumulating,
    /// `PUT` in progress.
    Committing,
    /// Admission handed to the pull scheduler.
    Delegated,
    /// Waiting for the client to relay the bytes.
    Relaying,
    /// `BYE` in progress.
    Finalizing,
    /// Done.
    Closed,
}

/// Verbs of the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    Version,
    From,
    User,
    RemoteIp,
    Destination,
    Size,
    Format,
    Group,
    Purge,
    Asap,
    Event,
    TimeFile,
    Priority,
    Source,
    Original,
    HostForAcquisition,
    Target,
    Identity,
    Caller,
    Lifetime,
    Delay,
    Buffer,
    At,
    Metadata,
    ReqId,
    GroupBy,
    Requeue,
    Force,
    Acquisition,
    FailedOnly,
    NoRetrieval,
    DontSend,
    Standby,
    Index,
    TimeCritical,
    UniqueName,
    Remove,
    Host,
    Put,
    Bye,
    Expected,
    Started,
    Completed,
    Reset,
    WaitForGroup,
    Select,
    Update,
    Noop,
    Streams,
    Timeout,
    Error,
    Quit,
    DestinationStart,
    DestinationStop,
    SchedulerStart,
    SchedulerStop,
    SchedulerCheck,
}

impl FromStr for Command {
    type Err = ControlError;

    fn from_str(verb: &str) -> Result<Self> {
        let command = match verb.to_ascii_uppercase().as_str() {
            "VERSION" => Self::Version,
            "FROM" => Self::From,
            "USER" => Self::User,
            "REMOTEIP" => Self::RemoteIp,
            "DESTINATION" => Self::Destination,
            "SIZE" => Self::Size,
            "FORMAT" => Self::Format,
            "GROUP" => Self::Group,
            "PURGE" => Self::Purge,
            "ASAP" => Self::Asap,
            "EVENT" => Self::Event,
            "TIMEFILE" => Self::TimeFile,
            "PRIORITY" => Self::Priority,
            "SOURCE" => Self::Source,
            "ORIGINAL" => Self::Original,
            "HOSTFORACQUISITION" => Self::HostForAcquisition,
            "TARGET" => Self::Target,
            "IDENTITY" => Self::Identity,
            "CALLER" => Self::Caller,
            "LIFETIME" => Self::Lifetime,
            "DELAY" => Self::Delay,
            "BUFFER" => Self::Buffer,
            "AT" => Self::At,
            "METADATA" => Self::Metadata,
            "REQID" => Self::ReqId,
            "GROUPBY" => Self::GroupBy,
            "REQUEUE" => Self::Requeue,
            "FORCE" => Self::Force,
            "ACQUISITION" => Self::Acquisition,
            "FAILEDONLY" => Self::FailedOnly,
            "NORETRIEVAL" => Self::NoRetrieval,
            "DONTSEND" => Self::DontSend,
            "STANDBY" => Self::Standby,
            "INDEX" => Self::Index,
            "TIMECRITICAL" => Self::TimeCritical,
            "UNIQUENAME" => Self::UniqueName,
            "REMOVE" => Self::Remove,
            "HOST" => Self::Host,
            "PUT" => Self::Put,
            "BYE" => Self::Bye,
            "EXPECTED" => Self::Expected,
            "STARTED" => Self::Started,
            "COMPLETED" => Self::Completed,
            "RESET" => Self::Reset,
            "WAITFORGROUP" => Self::WaitForGroup,
            "SELECT" => Self::Select,
            "UPDATE" => Self::Update,
            "NOOP" => Self::Noop,
            "STREAMS" => Self::Streams,
            "TIMEOUT" => Self::Timeout,
            "ERROR" => Self::Error,
            "QUIT" => Self::Quit,
            "DESTINATIONSTART" => Self::DestinationStart,
            "DESTINATIONSTOP" => Self::DestinationStop,
            "SCHEDULERSTART" => Self::SchedulerStart,
            "SCHEDULERSTOP" => Self::SchedulerStop,
            "SCHEDULERCHECK" => Self::SchedulerCheck,
            _ => return Err(ControlError::UnknownCommand(verb.to_string())),
        };
        Ok(command)
    }
}

/// Split a line into its verb and optional parameter.
#[must_use]
pub fn split_line(line: &str) -> (&str, Option<&str>) {
    match line.trim_start().split_once(' ') {
        Some((verb, parameter)) => (verb, Some(parameter)),
        None => (line.trim(), None),
    }
}

fn required(parameter: Option<&str>) -> Result<&str> {
    parameter
        .filter(|p| !p.trim().is_empty())
        .ok_or(ControlError::Missing("parameter"))
}

/// A client session.
pub struct Session<S: Store> {
    coordinator: Arc<Coordinator<S>>,
    id: SessionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    out: mpsc::Sender<Reply>,
    state: SessionState,
    version: String,
    user: Option<String>,
    remote_ip: Option<String>,
    from: Option<String>,
    process_metadata: bool,
    request: PendingRequest,
    admission: Option<Admission<S>>,
}

impl<S: Store + 'static> Session<S> {
    /// Open a session for a peer; replies go to `out`.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator<S>>, peer: SocketAddr, out: mpsc::Sender<Reply>) -> Self {
        let request = PendingRequest::new(coordinator.config());
        Self {
            coordinator,
            id: SessionId::generate(),
            peer,
            connected_at: Utc::now(),
            out,
            state: SessionState::Unauthenticated,
            version: String::new(),
            user: None,
            remote_ip: None,
            from: None,
            process_metadata: true,
            request,
            admission: None,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Process one line.
    pub async fn handle(&mut self, line: &str) -> Flow {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        let result = if self.state == SessionState::Relaying {
            self.relaying(line).await
        } else {
            self.command(line).await
        };
        match result {
            Ok(Flow::Continue) => Flow::Continue,
            Ok(Flow::Close) => {
                self.state = SessionState::Closed;
                Flow::Close
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::Protocol | ErrorKind::Conflict | ErrorKind::Relay => {
                        tracing::warn!(session_id = %self.id, error = %e, "request rejected");
                    }
                    ErrorKind::Repository | ErrorKind::Internal => {
                        tracing::error!(session_id = %self.id, error = ?e, "process aborted");
                    }
                }
                self.send(Reply::Err(e.to_string())).await;
                self.state = SessionState::Closed;
                Flow::Close
            }
        }
    }

    async fn send(&self, reply: Reply) {
        if self.out.send(reply).await.is_err() {
            tracing::debug!(session_id = %self.id, "reply dropped, connection gone");
        }
    }

    fn requester(&self) -> Result<Requester> {
        let (Some(user), Some(remote_ip)) = (&self.user, &self.remote_ip) else {
            return Err(ControlError::NotLoggedIn);
        };
        Ok(Requester {
            session_id: self.id,
            user: user.clone(),
            remote_ip: remote_ip.clone(),
            peer_host: self.peer.ip().to_string(),
            peer_port: self.peer.port(),
            version: self.version.clone(),
            from: self.from.clone(),
            connected_at: self.connected_at,
        })
    }

    fn accumulated(&mut self) -> Flow {
        if self.state == SessionState::Identified {
            self.state = SessionState::Accumulating;
        }
        Flow::Continue
    }

    #[allow(clippy::too_many_lines)]
    async fn command(&mut self, line: &str) -> Result<Flow> {
        let (verb, parameter) = split_line(line);
        let command: Command = verb.parse()?;
        tracing::trace!(session_id = %self.id, ?command, "command received");
        let request = &mut self.request;
        match command {
            Command::Version => return self.version(required(parameter)?).await,
            Command::User => return self.user(required(parameter)?).await,
            Command::From => self.from = Some(required(parameter)?.to_string()),
            Command::RemoteIp => self.remote_ip = Some(required(parameter)?.trim().to_string()),
            Command::Destination => request.destination = Some(required(parameter)?.trim().to_string()),
            Command::Size => request.set_size(required(parameter)?)?,
            Command::Format => request.set_date_format(required(parameter)?)?,
            Command::Group => request.transfer_group = Some(required(parameter)?.trim().to_string()),
            Command::Purge => request.purge = parse_flag(required(parameter)?),
            Command::Asap => request.asap = parse_flag(required(parameter)?),
            Command::Event => request.event = parse_flag(required(parameter)?),
            Command::TimeFile => request.set_time_file(required(parameter)?)?,
            Command::Priority => request.set_priority(required(parameter)?)?,
            Command::Source => request.set_source(required(parameter)?)?,
            Command::Original => request.set_original(required(parameter)?)?,
            Command::HostForAcquisition => request.set_host_for_acquisition(required(parameter)?)?,
            Command::Target => request.set_target(required(parameter)?)?,
            Command::Identity => request.set_identity(required(parameter)?)?,
            Command::Caller => request.caller = Some(required(parameter)?.to_string()),
            Command::Lifetime => request.set_lifetime(required(parameter)?)?,
            Command::Delay => request.set_delay(required(parameter)?)?,
            Command::Buffer => request.set_buffer(required(parameter)?)?,
            Command::At => request.set_at(required(parameter)?)?,
            Command::Metadata => request
                .metadata
                .apply(required(parameter)?, self.process_metadata)?,
            Command::ReqId => request.set_request_id(required(parameter)?)?,
            Command::GroupBy => request.set_group_by(required(parameter)?)?,
            Command::Requeue => request.requeue = parse_flag(required(parameter)?),
            Command::Force => request.force = parse_flag(required(parameter)?),
            Command::Acquisition => request.acquisition = parse_flag(required(parameter)?),
            Command::FailedOnly => request.failed_only = parse_flag(required(parameter)?),
            Command::NoRetrieval => request.no_retrieval = parse_flag(required(parameter)?),
            Command::DontSend | Command::Standby => {
                request.standby = parse_flag(required(parameter)?);
            }
            Command::Index => request.set_index(required(parameter)?)?,
            Command::TimeCritical => request.time_critical = parse_flag(required(parameter)?),
            Command::UniqueName => request.unique_name = Some(required(parameter)?.to_string()),
            Command::Remove => request.remove = parse_flag(required(parameter)?),
            Command::Streams => request.set_streams(required(parameter)?)?,
            Command::Timeout => request.set_timeout(required(parameter)?)?,
            Command::Host => {
                tracing::warn!(session_id = %self.id, "HOST outside of a transmission ignored");
            }
            Command::Noop => {}
            Command::Error => {
                tracing::error!(session_id = %self.id, "{}", parameter.unwrap_or_default());
            }
            Command::Quit => return Ok(Flow::Close),
            Command::Put => return self.put().await,
            Command::Bye => {
                return Err(ControlError::Invalid("No transmission in progress".into()));
            }
            Command::Expected => return self.notify(ProductState::Init).await,
            Command::Started => return self.notify(ProductState::Exec).await,
            Command::Completed => return self.notify(ProductState::Done).await,
            Command::Reset => {
                let message = self.coordinator.reset_products(&self.request)?;
                self.send(Reply::Ok(message)).await;
                return Ok(Flow::Close);
            }
            Command::WaitForGroup => return self.wait_for_group(required(parameter)?).await,
            Command::Select => {
                let requester = self.requester()?;
                if self.coordinator.config().log_requests {
                    RequestRecord::new(RequestKind::Select)
                        .field("USER", Some(&requester.user))
                        .field("VERSION", Some(&requester.version))
                        .field("SELECT", parameter)
                        .emit();
                }
                return Err(ControlError::Unsupported("SELECT"));
            }
            Command::Update => {
                self.requester()?;
                return Err(ControlError::Unsupported("UPDATE"));
            }
            Command::DestinationStart
            | Command::DestinationStop
            | Command::SchedulerStart
            | Command::SchedulerStop
            | Command::SchedulerCheck => return self.scheduler(command).await,
        }
        Ok(self.accumulated())
    }

    async fn version(&mut self, version: &str) -> Result<Flow> {
        let version = version.trim();
        self.version = version.to_string();
        // Acquisition pushes carry no dissemination metadata
        self.process_metadata = !version.ends_with(" (acquisition)");
        self.send(Reply::Ok(format!("VERSION {version}"))).await;
        Ok(Flow::Continue)
    }

    async fn user(&mut self, user: &str) -> Result<Flow> {
        let port = self.peer.port();
        if port > MAX_PRIVILEGED_PORT {
            tracing::warn!(session_id = %self.id, port, "not a privileged IP port");
            if self.coordinator.config().check_port {
                return Err(ControlError::PortNotPrivileged);
            }
        }
        let user = user.trim().to_string();
        let remote_ip = self.peer.ip().to_string();
        if self.from.is_none() {
            self.from = Some(format!(
                "From the {} command at {remote_ip}",
                command_name(&self.version)
            ));
        }
        if self.process_metadata {
            self.request.metadata.seed_defaults();
        }
        let welcome = if user == "-" {
            format!("welcome from {remote_ip}")
        } else {
            format!("welcome {user}@{remote_ip}")
        };
        tracing::info!(session_id = %self.id, user = %user, remote_ip = %remote_ip, version = %self.version, "user logged in");
        self.user = Some(user);
        self.remote_ip = Some(remote_ip);
        self.state = SessionState::Identified;
        self.send(Reply::message(welcome)).await;
        Ok(Flow::Continue)
    }

    async fn put(&mut self) -> Result<Flow> {
        let requester = self.requester()?;
        self.state = SessionState::Committing;
        let request = std::mem::replace(
            &mut self.request,
            PendingRequest::new(self.coordinator.config()),
        );
        match self.coordinator.admit(request, &requester)? {
            Admitted::Done(message) => {
                self.state = SessionState::Delegated;
                self.send(Reply::Ok(message)).await;
                Ok(Flow::Close)
            }
            Admitted::Relay(admission) => {
                self.send(Reply::Ok(format!("TARGET {}", admission.target_path())))
                    .await;
                self.send(Reply::Ok(format!("ECPROXY {}", admission.mover_list())))
                    .await;
                self.send(Reply::Ok("Please continue".to_string())).await;
                self.admission = Some(admission);
                self.state = SessionState::Relaying;
                Ok(Flow::Continue)
            }
        }
    }

    async fn relaying(&mut self, line: &str) -> Result<Flow> {
        let Some(admission) = self.admission.as_mut() else {
            return Err(ControlError::Invalid("No transmission in progress".into()));
        };
        if line.starts_with('-') {
            admission.record_host(line);
            return self.finalize().await;
        }
        let (verb, parameter) = split_line(line);
        match verb.parse::<Command>()? {
            Command::Host => admission.record_host(required(parameter)?),
            Command::Size => admission.set_size(parse_size(required(parameter)?)?),
            Command::Bye => return self.finalize().await,
            Command::Noop => {}
            Command::Error => {
                tracing::error!(session_id = %self.id, "{}", parameter.unwrap_or_default());
            }
            Command::Quit => return Ok(Flow::Close),
            _ => {
                return Err(ControlError::Invalid(format!(
                    "Command {verb} not allowed during transmission"
                )));
            }
        }
        Ok(Flow::Continue)
    }

    async fn finalize(&mut self) -> Result<Flow> {
        let admission = self
            .admission
            .take()
            .ok_or_else(|| ControlError::Invalid("No transmission in progress".into()))?;
        self.state = SessionState::Finalizing;
        let message = admission.finalize()?;
        self.send(Reply::Ok(message)).await;
        Ok(Flow::Close)
    }

    async fn notify(&mut self, state: ProductState) -> Result<Flow> {
        let requester = Requester {
            user: self.user.clone().unwrap_or_else(|| "-".to_string()),
            remote_ip: self
                .remote_ip
                .clone()
                .unwrap_or_else(|| self.peer.ip().to_string()),
            ..self.anonymous()
        };
        let message = self.coordinator.notify(state, &self.request, &requester)?;
        self.send(Reply::Ok(message)).await;
        Ok(Flow::Close)
    }

    fn anonymous(&self) -> Requester {
        Requester {
            session_id: self.id,
            user: "-".to_string(),
            remote_ip: "-".to_string(),
            peer_host: self.peer.ip().to_string(),
            peer_port: self.peer.port(),
            version: self.version.clone(),
            from: self.from.clone(),
            connected_at: self.connected_at,
        }
    }

    async fn wait_for_group(&mut self, group: &str) -> Result<Flow> {
        let requester = self.requester()?;
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let coordinator = Arc::clone(&self.coordinator);
        let group = group.trim().to_string();
        let wait = async move {
            let result = coordinator.wait_for_group(&group, &requester, &tx).await;
            drop(tx);
            result
        };
        let out = self.out.clone();
        let forward = async move {
            while let Some(line) = rx.recv().await {
                if out.send(Reply::Ok(line)).await.is_err() {
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(wait, forward);
        self.send(Reply::Ok(result?)).await;
        self.send(Reply::Ok("QUIT".to_string())).await;
        Ok(Flow::Close)
    }

    async fn scheduler(&mut self, command: Command) -> Result<Flow> {
        let requester = self.requester()?;
        let scheduler = self.coordinator.scheduler();
        let acquisition = self.request.acquisition;
        let message = match command {
            Command::DestinationStart | Command::DestinationStop => {
                let destination = self
                    .request
                    .destination
                    .clone()
                    .ok_or(ControlError::DestinationNotSpecified)?;
                if command == Command::DestinationStart {
                    scheduler.start_destination(&destination).await?;
                    "Destination started".to_string()
                } else {
                    scheduler.stop_destination(&destination).await?;
                    "Destination stopped".to_string()
                }
            }
            Command::SchedulerStart => {
                scheduler.set_paused(acquisition, false).await?;
                "Scheduler started".to_string()
            }
            Command::SchedulerStop => {
                scheduler.set_paused(acquisition, true).await?;
                "Scheduler stopped".to_string()
            }
            _ => scheduler
                .check(acquisition, self.request.streams, self.request.timeout)
                .await?
                .to_string(),
        };
        tracing::info!(session_id = %self.id, user = %requester.user, ?command, "scheduler control");
        self.send(Reply::message(message)).await;
        Ok(Flow::Close)
    }
}

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("cmd=(.*?),").expect("valid regex"));

/// Client command named in a version string (`cmd=<name>,`), `ecpds` by default.
fn command_name(version: &str) -> String {
    COMMAND_RE
        .captures(version)
        .map_or_else(|| "ecpds".to_string(), |c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControlConfig;
    use ecgate_store::{Destination, Mover, RocksStore, StatusCode};
    use tempfile::TempDir;

    struct Harness {
        session: Session<RocksStore>,
        replies: mpsc::Receiver<Reply>,
        coordinator: Arc<Coordinator<RocksStore>>,
        store: Arc<RocksStore>,
        _dir: TempDir,
    }

    impl Harness {
        fn new(port: u16) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(RocksStore::open(dir.path()).unwrap());
            store.put_destination(&Destination::new("dest")).unwrap();
            store
                .put_mover(&Mover {
                    name: "m1".into(),
                    host: "127.0.0.1".into(),
                    port: 9001,
                    transfer_group: "default".into(),
                    active: true,
                })
                .unwrap();
            let coordinator = Arc::new(Coordinator::new(Arc::clone(&store), ControlConfig::default()));
            coordinator.refresh_movers().unwrap();
            let (tx, replies) = mpsc::channel(64);
            let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
            Self {
                session: Session::new(Arc::clone(&coordinator), peer, tx),
                replies,
                coordinator,
                store,
                _dir: dir,
            }
        }

        async fn send(&mut self, lines: &[&str]) -> Flow {
            let mut flow = Flow::Continue;
            for line in lines {
                flow = self.session.handle(line).await;
            }
            flow
        }

        fn replies(&mut self) -> Vec<String> {
            let mut replies = Vec::new();
            while let Ok(reply) = self.replies.try_recv() {
                replies.push(reply.to_string());
            }
            replies
        }

        async fn login(&mut self) {
            self.send(&["VERSION 6.7.0 cmd=ecpds,", "USER alice"]).await;
            assert_eq!(
                self.replies(),
                ["+VERSION 6.7.0 cmd=ecpds,", "+MESSAGE welcome alice@127.0.0.1"]
            );
        }
    }

    #[test]
    fn verbs_and_lines() {
        assert_eq!("put".parse::<Command>().unwrap(), Command::Put);
        assert_eq!("DontSend".parse::<Command>().unwrap(), Command::DontSend);
        assert_eq!(
            "FOO".parse::<Command>().unwrap_err().to_string(),
            "Unknown command FOO"
        );
        assert_eq!(split_line("TARGET a b.txt"), ("TARGET", Some("a b.txt")));
        assert_eq!(split_line("PUT"), ("PUT", None));
        assert_eq!(Reply::message("hi").to_string(), "+MESSAGE hi");
        assert_eq!(Reply::Err("no".into()).to_string(), "-no");
        assert_eq!(command_name("1.0 cmd=mspds,os=linux"), "mspds");
        assert_eq!(command_name("1.0"), "ecpds");
    }

    #[tokio::test]
    async fn login_rules() {
        let mut h = Harness::new(40000);
        assert_eq!(h.send(&["USER alice"]).await, Flow::Close);
        assert_eq!(
            h.replies(),
            ["-Not a privileged IP port (connection refused by server)"]
        );

        let mut h = Harness::new(800);
        assert_eq!(h.send(&["DESTINATION dest", "PUT"]).await, Flow::Close);
        assert_eq!(h.replies(), ["-Please login first"]);

        let mut h = Harness::new(800);
        assert_eq!(h.send(&["VERSION"]).await, Flow::Close);
        assert_eq!(h.replies(), ["-Missing parameter"]);

        let mut h = Harness::new(800);
        h.login().await;
        assert_eq!(h.session.state(), SessionState::Identified);
        assert_eq!(h.send(&["BOGUS x"]).await, Flow::Close);
        assert_eq!(h.replies(), ["-Unknown command BOGUS"]);
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn push_session() {
        let mut h = Harness::new(800);
        h.login().await;
        let flow = h
            .send(&[
                "DESTINATION dest",
                "ORIGINAL /data/in/file.grib",
                "TARGET /out/",
                "METADATA stream=oper,time=12",
                "PUT",
            ])
            .await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.session.state(), SessionState::Relaying);
        let replies = h.replies();
        assert_eq!(replies.len(), 3);
        assert!(replies[0].starts_with("+TARGET /default/"));
        assert_eq!(replies[1], "+ECPROXY 127.0.0.1:9001");
        assert_eq!(replies[2], "+Please continue");

        let flow = h.send(&["HOST +(m1|1700000000000|2s)", "SIZE 5", "BYE"]).await;
        assert_eq!(flow, Flow::Close);
        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("+MESSAGE 1 DataTransfer(s) will start at: "));

        let transfers = h.store.list_transfers_by_destination("dest").unwrap();
        assert_eq!(transfers[0].status, StatusCode::Wait);
        assert_eq!(transfers[0].target, "out/file.grib");
        assert_eq!(transfers[0].size, 5);
        assert!(h.coordinator.locks().is_empty());
    }

    #[tokio::test]
    async fn relay_failure_line() {
        let mut h = Harness::new(800);
        h.login().await;
        h.send(&["DESTINATION dest", "ORIGINAL /a", "TARGET a", "PUT"]).await;
        h.replies();
        let flow = h.send(&["-Transmission failed to each Data Mover"]).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(
            h.replies(),
            ["-Error during transmission to group default (Transmission failed to each Data Mover)"]
        );
        let transfer = &h.store.list_transfers_by_destination("dest").unwrap()[0];
        assert_eq!(transfer.status, StatusCode::Fail);
        assert!(transfer.deleted);
    }

    #[tokio::test]
    async fn dropped_session_rolls_back() {
        let mut h = Harness::new(800);
        h.login().await;
        h.send(&["DESTINATION dest", "ORIGINAL /a", "TARGET a", "PUT"]).await;
        assert_eq!(h.coordinator.locks().len(), 1);
        let Harness { session, coordinator, store, _dir, .. } = h;
        drop(session);
        assert!(coordinator.locks().is_empty());
        let transfer = &store.list_transfers_by_destination("dest").unwrap()[0];
        assert_eq!(transfer.status, StatusCode::Fail);
    }

    #[tokio::test]
    async fn group_by_session() {
        let mut h = Harness::new(800);
        h.login().await;
        let flow = h
            .send(&["DESTINATION dest", "ORIGINAL /a", "GROUPBY g1", "PUT"])
            .await;
        assert_eq!(flow, Flow::Close);
        let replies = h.replies();
        assert!(replies[0].starts_with("+MESSAGE 1 DataTransfer(s) initialized for group g1: "));
    }

    #[tokio::test]
    async fn notifications_and_unsupported_verbs() {
        let mut h = Harness::new(800);
        h.send(&[
            "VERSION 6.7.0 (acquisition)",
            "METADATA stream=oper,time=00,step=12",
            "AT 20240101060000",
            "EXPECTED",
        ])
        .await;
        assert_eq!(
            h.replies(),
            ["+VERSION 6.7.0 (acquisition)", "+MESSAGE Product status created as Expected (ProductId=1)"]
        );

        let mut h = Harness::new(800);
        h.login().await;
        assert_eq!(h.send(&["SELECT * FROM x"]).await, Flow::Close);
        assert_eq!(
            h.replies(),
            ["-SELECT not supported (no direct database access on this gateway)"]
        );
    }

    #[tokio::test]
    async fn scheduler_verbs() {
        let mut h = Harness::new(800);
        h.login().await;
        h.send(&["STREAMS 4", "TIMEOUT 10s", "SCHEDULERCHECK"]).await;
        assert_eq!(
            h.replies(),
            ["+MESSAGE Scheduler started (streams=4,timeout=10000)"]
        );

        let mut h = Harness::new(800);
        h.login().await;
        h.send(&["DESTINATION dest", "DESTINATIONSTOP"]).await;
        assert_eq!(h.replies(), ["+MESSAGE Destination stopped"]);
        let destination = h.store.get_destination("dest").unwrap().unwrap();
        assert_eq!(destination.state, ecgate_store::DestinationState::Stopped);
    }
}
