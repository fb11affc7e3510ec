//! Domain types stored in the database.
//!
//! These types represent the persisted state of destinations, movers, data files,
//! transfers, their histories and the product statuses used for monitoring.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ecgate_core::{DataFileId, ProductId, TransferId, UniqueKey};
use serde::{Deserialize, Serialize};

// =============================================================================
// Destinations and movers
// =============================================================================

/// A named delivery target with its own scheduling policy and alias set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Unique destination name.
    pub name: String,
    /// Operational state, toggled by `DESTINATIONSTART`/`DESTINATIONSTOP`.
    #[serde(default)]
    pub state: DestinationState,
    /// Only time-critical sessions may target it.
    #[serde(default)]
    pub time_critical: bool,
    /// Users allowed to push time-critical data.
    #[serde(default)]
    pub authorized_users: Vec<String>,
    /// Maximum number of pending transfers; `0` means no limit.
    #[serde(default)]
    pub max_pending: u64,
    /// Maximum accepted file size in bytes; `0` means no limit.
    #[serde(default)]
    pub max_file_size: u64,
    /// Transfer group used when neither the client nor the policy picks one.
    #[serde(default = "default_transfer_group")]
    pub transfer_group: String,
    /// Scheduling defaults and force rules.
    #[serde(default)]
    pub policy: DestinationPolicy,
    /// Alias rules fanning a transfer out to other destinations.
    #[serde(default)]
    pub aliases: Vec<AliasRule>,
}

fn default_transfer_group() -> String {
    "default".to_string()
}

impl Destination {
    /// A running destination with no policy, in the default transfer group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DestinationState::Running,
            time_critical: false,
            authorized_users: Vec::new(),
            max_pending: 0,
            max_file_size: 0,
            transfer_group: default_transfer_group(),
            policy: DestinationPolicy::default(),
            aliases: Vec::new(),
        }
    }
}

/// Operational state of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DestinationState {
    /// Transfers are scheduled.
    #[default]
    Running,
    /// Transfers are held back.
    Stopped,
}

/// Per-destination scheduling policy.
///
/// `defaults` holds unconditional values; `rules` are evaluated in order and the
/// first applicable rule declaring a key wins over the default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DestinationPolicy {
    /// Unconditional scheduling defaults, keyed by option name.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    /// Ordered force rules.
    #[serde(default)]
    pub rules: Vec<ForceRule>,
}

/// A pattern-matched override declared on a destination.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForceRule {
    /// Inclusion pattern matched against the whole target name (`.*` when absent).
    #[serde(default)]
    pub pattern: Option<String>,
    /// Exclusion pattern; a matching target is not affected.
    #[serde(default)]
    pub ignore: Option<String>,
    /// Forced values, keyed by option name.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Fan-out of a destination to another destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRule {
    /// Name of the aliased destination.
    pub destination: String,
    /// Inclusion pattern matched against the target (`.*` when absent).
    #[serde(default)]
    pub pattern: Option<String>,
    /// Exclusion pattern.
    #[serde(default)]
    pub ignore: Option<String>,
    /// Target template; `$target` and `$name` are substituted.
    #[serde(default)]
    pub target: Option<String>,
    /// Lifetime override (duration string).
    #[serde(default)]
    pub lifetime: Option<String>,
    /// Priority override.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Extra delay (duration string).
    #[serde(default)]
    pub delay: Option<String>,
    /// ASAP override.
    #[serde(default)]
    pub asap: Option<bool>,
    /// Event override.
    #[serde(default)]
    pub event: Option<bool>,
}

/// A worker node that performs the final disk write of a relayed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mover {
    /// Unique mover name, reported back in the `STAT` token.
    pub name: String,
    /// Host the mover listens on.
    pub host: String,
    /// Port the mover listens on.
    pub port: u16,
    /// Transfer group the mover belongs to.
    #[serde(default = "default_transfer_group")]
    pub transfer_group: String,
    /// Inactive movers are never offered to clients.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Mover {
    /// The `host:port` form used in mover candidate lists.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Files and transfers
// =============================================================================

/// One physical payload admitted into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    /// Identifier.
    pub id: DataFileId,
    /// Original file name on the producer side.
    pub original: Option<String>,
    /// Source name.
    pub source: Option<String>,
    /// Size in bytes, `-1` when not known yet.
    pub size: i64,
    /// When the file was admitted.
    pub arrived_at: DateTime<Utc>,
    /// Logical content timestamp supplied by the client.
    pub time_file: Option<DateTime<Utc>>,
    /// Product date.
    pub time_base: DateTime<Utc>,
    /// Forecast step.
    pub time_step: Option<i64>,
    /// Monitoring stream (`domain` prefixed).
    pub meta_stream: String,
    /// Monitoring type.
    pub meta_type: Option<String>,
    /// Monitoring time (`HH`).
    pub meta_time: String,
    /// Monitoring target.
    pub meta_target: String,
    /// Pull-mode group.
    pub group_by: Option<String>,
    /// Transfer group the payload is stored in.
    pub transfer_group: String,
    /// Storage path handed to the movers.
    pub storage_path: String,
    /// Whether the bytes are already on a mover.
    pub downloaded: bool,
    /// Incremented each time the payload is overwritten.
    pub file_instance: Option<u32>,
    /// Logically deleted.
    pub deleted: bool,
    /// Payload removed from the movers.
    pub removed: bool,
    /// Whether the original should be removed once retrieved.
    pub delete_original: bool,
    /// Whether the file was admitted in standby.
    pub standby: bool,
    /// Host to retrieve the file from in pull mode.
    pub host_for_acquisition: Option<String>,
    /// Client-provided index.
    pub index: Option<u32>,
    /// Submitting user, when known.
    pub user: Option<String>,
    /// Submitting host, when known.
    pub remote_host: Option<String>,
    /// Caller string.
    pub caller: Option<String>,
    /// Mover that stored the payload.
    pub get_host: Option<String>,
    /// When the mover stored the payload.
    pub get_time: Option<DateTime<Utc>>,
    /// Duration reported by the mover.
    pub get_duration: Option<String>,
    /// Duration of the whole upload in milliseconds.
    pub get_complete_duration_ms: Option<u64>,
}

/// Status code of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    /// Created, not yet finalised.
    Init = 0,
    /// Queued for a first delivery.
    Wait = 1,
    /// In standby, waiting for a manual requeue.
    Hold = 2,
    /// Waiting for retrieval by the pull scheduler.
    Sche = 3,
    /// Queued for a retry.
    Retr = 4,
    /// Being fetched or delivered.
    Fetc = 5,
    /// Delivered.
    Done = 6,
    /// Stopped.
    Stop = 7,
    /// Failed.
    Fail = 8,
}

impl StatusCode {
    /// All codes in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Init,
        Self::Wait,
        Self::Hold,
        Self::Sche,
        Self::Retr,
        Self::Fetc,
        Self::Done,
        Self::Stop,
        Self::Fail,
    ];

    /// Convert to a byte for index keys.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Convert from a byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Wait),
            2 => Some(Self::Hold),
            3 => Some(Self::Sche),
            4 => Some(Self::Retr),
            5 => Some(Self::Fetc),
            6 => Some(Self::Done),
            7 => Some(Self::Stop),
            8 => Some(Self::Fail),
            _ => None,
        }
    }

    /// The four-letter code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Wait => "WAIT",
            Self::Hold => "HOLD",
            Self::Sche => "SCHE",
            Self::Retr => "RETR",
            Self::Fetc => "FETC",
            Self::Done => "DONE",
            Self::Stop => "STOP",
            Self::Fail => "FAIL",
        }
    }

    /// Parse a four-letter code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Whether the transfer still counts against a destination's pending quota.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Done | Self::Fail | Self::Stop)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One delivery of a [`DataFile`] to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransfer {
    /// Identifier.
    pub id: TransferId,
    /// The delivered payload.
    pub data_file_id: DataFileId,
    /// Destination name.
    pub destination: String,
    /// Target file name on the destination.
    pub target: String,
    /// Identity string.
    pub identity: String,
    /// Priority, 0 (highest) to 99.
    pub priority: u8,
    /// Current status.
    pub status: StatusCode,
    /// Earliest delivery time.
    pub scheduled_at: DateTime<Utc>,
    /// Queue time.
    pub queued_at: DateTime<Utc>,
    /// Next retry time.
    pub retry_at: DateTime<Utc>,
    /// After this time the transfer is abandoned.
    pub expires_at: DateTime<Utc>,
    /// Deduplication key.
    pub unique_key: UniqueKey,
    /// Free-form comment.
    pub comment: String,
    /// Size in bytes, `-1` when not known yet.
    pub size: i64,
    /// Bytes sent so far.
    pub sent: u64,
    /// Deliver as soon as possible.
    pub asap: bool,
    /// Trigger an event on delivery.
    pub event: bool,
    /// Number of delivery attempts.
    pub start_count: u32,
    /// Number of requeues.
    pub requeue_count: u32,
    /// Logically deleted.
    pub deleted: bool,
    /// Source host will be used instead of a retrieval.
    pub replicated: bool,
    /// Mover holding the payload for this delivery.
    pub mover: Option<String>,
    /// Product date, copied from the data file.
    pub time_base: DateTime<Utc>,
    /// Forecast step, copied from the data file.
    pub time_step: Option<i64>,
    /// Completion time, set by downstream workers.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Append-only record of a transfer status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHistory {
    /// The transfer.
    pub transfer_id: TransferId,
    /// Destination of the transfer.
    pub destination: String,
    /// Status after the change.
    pub status: StatusCode,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// Comment recorded with the change.
    pub comment: String,
    /// Whether the change reports an error.
    pub error: bool,
}

/// Accounting record of a push upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingHistory {
    /// The transfer the upload was recorded for.
    pub transfer_id: TransferId,
    /// Destination name.
    pub destination: String,
    /// Target file name.
    pub file_name: String,
    /// Uploaded bytes.
    pub file_size: i64,
    /// Scheduled time of the transfer.
    pub scheduled_at: DateTime<Utc>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Upload duration in milliseconds.
    pub duration_ms: u64,
    /// Uploading user.
    pub user: String,
    /// Uploading host.
    pub host: String,
    /// `ecpds` or `mspds`.
    pub protocol: String,
    /// Monitoring stream of the data file.
    pub meta_stream: String,
    /// Monitoring time of the data file.
    pub meta_time: String,
    /// Product date of the data file.
    pub time_base: DateTime<Utc>,
}

// =============================================================================
// Product monitoring
// =============================================================================

/// Lifecycle of a monitored product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProductState {
    /// Announced by `EXPECTED`.
    Init = 0,
    /// Announced by `STARTED`.
    Exec = 1,
    /// Announced by `COMPLETED`.
    Done = 2,
}

impl ProductState {
    /// Human name used in replies.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "Expected",
            Self::Exec => "Started",
            Self::Done => "Completed",
        }
    }
}

/// Monitoring record of a product identified by stream, time, step and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStatus {
    /// Identifier.
    pub id: ProductId,
    /// Stream (`domain` prefixed).
    pub stream: String,
    /// Time (`HH`).
    pub time: String,
    /// Forecast step.
    pub step: i64,
    /// Product type.
    pub product_type: Option<String>,
    /// Current state.
    pub status: ProductState,
    /// Product date.
    pub time_base: DateTime<Utc>,
    /// Expected completion time.
    pub schedule_time: DateTime<Utc>,
    /// Last notification time, strictly increasing.
    pub last_update: DateTime<Utc>,
    /// Buffer time in milliseconds.
    pub buffer_ms: Option<i64>,
    /// User that sent the last notification.
    pub user: Option<String>,
    /// Origin of the last notification.
    pub comment: Option<String>,
}
