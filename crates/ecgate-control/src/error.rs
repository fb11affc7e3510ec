//! Error types for the admission coordinator.
//!
//! The `Display` form of every variant is the exact reason sent to the client
//! after a `-` reply marker.

use ecgate_core::{TransferId, UniqueKey};
use ecgate_store::StatusCode;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Broad error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-order commands and invalid parameters.
    Protocol,
    /// Duplicates, lock conflicts, unknown destinations and quotas.
    Conflict,
    /// Failure reported by the relay hop.
    Relay,
    /// Repository failure.
    Repository,
    /// Broken internal invariant.
    Internal,
}

/// Errors that can occur while serving a session.
#[derive(Debug, Error)]
pub enum ControlError {
    // =========================================================================
    // Protocol errors
    // =========================================================================
    /// A command that requires `USER` first.
    #[error("Please login first")]
    NotLoggedIn,

    /// Login from an unprivileged port.
    #[error("Not a privileged IP port (connection refused by server)")]
    PortNotPrivileged,

    /// A parameter longer than allowed.
    #[error("Invalid value specified for the -{option} option (max length is {max})")]
    TooLong {
        /// The option name.
        option: &'static str,
        /// The maximum length.
        max: usize,
    },

    /// A metadata name or value longer than allowed.
    #[error("Invalid {what} for metadata {name} (max size is {max})")]
    MetadataTooLong {
        /// `name` or `value`.
        what: &'static str,
        /// The metadata name.
        name: String,
        /// The maximum length.
        max: usize,
    },

    /// A parameter that cannot be parsed or is out of range.
    #[error("{0}")]
    Invalid(String),

    /// Required values are missing.
    #[error("Missing {0}")]
    Missing(&'static str),

    /// A verb the gateway does not know.
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    /// A verb the gateway knows but does not offer.
    #[error("{0} not supported (no direct database access on this gateway)")]
    Unsupported(&'static str),

    // =========================================================================
    // Admission conflicts
    // =========================================================================
    /// `PUT` without `DESTINATION`.
    #[error("Destination not specified")]
    DestinationNotSpecified,

    /// The destination does not exist.
    #[error("Destination {0} not found")]
    DestinationNotFound(String),

    /// Another session holds the unique key.
    #[error("Already processed by {owner} (uniqueKey={key})")]
    AlreadyProcessed {
        /// Description of the owning session.
        owner: String,
        /// The contended key.
        key: UniqueKey,
    },

    /// The computed expiry is in the past.
    #[error("The request has already expired (please review -at and/or -delay options)")]
    Expired,

    /// The key maps to more than one data file.
    #[error("{files} DataFiles found with {transfers} DataTransfers ({list}), please use the '-reqid' option to select one! (uniqueKey={key})")]
    AmbiguousDataFiles {
        /// Number of distinct data files.
        files: usize,
        /// Number of transfers.
        transfers: usize,
        /// `DataFileId=..` list.
        list: String,
        /// The key.
        key: UniqueKey,
    },

    /// `purge`/`requeue` with nothing to act on.
    #[error("No corresponding DataTransfer(s) to {0}")]
    NothingTo(&'static str),

    /// The key is already admitted and no override flag was given.
    #[error("Duplicate DataFile found with {transfers} DataTransfer(s) (DataFileId={data_file_id}), please use the '-requeue/force/purge' option!")]
    Duplicate {
        /// Number of transfers found.
        transfers: usize,
        /// The existing data file.
        data_file_id: u64,
    },

    /// A time-critical session targets an unsuitable destination.
    #[error("Access denied to Destination {destination} ({reason})")]
    AccessDenied {
        /// The destination.
        destination: String,
        /// Why access is denied.
        reason: &'static str,
    },

    /// The destination has reached its pending quota.
    #[error("Destination {destination} have {pending} pending DataTransfer(s) (limit is {limit})")]
    TooManyPending {
        /// The destination.
        destination: String,
        /// Current pending count.
        pending: u64,
        /// The quota.
        limit: u64,
    },

    /// The file is larger than the destination accepts.
    #[error("File exceeds maximum allowed size: {size} bytes (limit is {limit} bytes)")]
    FileTooLarge {
        /// Declared size.
        size: i64,
        /// The limit.
        limit: u64,
    },

    /// No active mover in the transfer group.
    #[error("No Data Mover available for transfer group {0}")]
    NoMover(String),

    /// Nothing was ever admitted for a pull group.
    #[error("Group {group} not found ({existing})")]
    GroupNotFound {
        /// The group.
        group: String,
        /// Number of data files found.
        existing: usize,
    },

    /// A notification for an unknown product without a schedule time.
    #[error("Product status not found (-at option required)")]
    ProductNotFound,

    // =========================================================================
    // Relay and repository failures
    // =========================================================================
    /// The relay hop reported a failure.
    #[error("{0}")]
    Transmission(String),

    /// Scheduler control failure.
    #[error("{0}")]
    Scheduler(String),

    /// Storage layer error.
    #[error("aborted by server")]
    Store(#[from] ecgate_store::StoreError),

    /// A status change outside the transfer state machine.
    #[error("invalid status transition for DataTransfer {transfer_id}: {from} -> {to}")]
    InvalidTransition {
        /// The transfer.
        transfer_id: TransferId,
        /// Current status.
        from: StatusCode,
        /// Requested status.
        to: StatusCode,
    },
}

impl ControlError {
    /// The class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotLoggedIn
            | Self::PortNotPrivileged
            | Self::TooLong { .. }
            | Self::MetadataTooLong { .. }
            | Self::Invalid(_)
            | Self::Missing(_)
            | Self::UnknownCommand(_)
            | Self::Unsupported(_) => ErrorKind::Protocol,
            Self::DestinationNotSpecified
            | Self::DestinationNotFound(_)
            | Self::AlreadyProcessed { .. }
            | Self::Expired
            | Self::AmbiguousDataFiles { .. }
            | Self::NothingTo(_)
            | Self::Duplicate { .. }
            | Self::AccessDenied { .. }
            | Self::TooManyPending { .. }
            | Self::FileTooLarge { .. }
            | Self::NoMover(_)
            | Self::GroupNotFound { .. }
            | Self::ProductNotFound => ErrorKind::Conflict,
            Self::Transmission(_) => ErrorKind::Relay,
            Self::Store(_) => ErrorKind::Repository,
            Self::Scheduler(_) | Self::InvalidTransition { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the client might succeed by retrying later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyProcessed { .. }
                | Self::TooManyPending { .. }
                | Self::NoMover(_)
                | Self::Transmission(_)
                | Self::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages() {
        assert_eq!(ControlError::NotLoggedIn.to_string(), "Please login first");
        assert_eq!(
            ControlError::TooLong {
                option: "target",
                max: 255
            }
            .to_string(),
            "Invalid value specified for the -target option (max length is 255)"
        );
        assert_eq!(
            ControlError::Duplicate {
                transfers: 2,
                data_file_id: 7
            }
            .to_string(),
            "Duplicate DataFile found with 2 DataTransfer(s) (DataFileId=7), please use the '-requeue/force/purge' option!"
        );
        assert_eq!(
            ControlError::Store(ecgate_store::StoreError::Database("io".into())).to_string(),
            "aborted by server"
        );
        assert_eq!(
            ControlError::Missing("metadata value(s) (stream and/or time)").to_string(),
            "Missing metadata value(s) (stream and/or time)"
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ControlError::NotLoggedIn.kind(), ErrorKind::Protocol);
        assert_eq!(ControlError::Expired.kind(), ErrorKind::Conflict);
        assert_eq!(
            ControlError::Transmission("x".into()).kind(),
            ErrorKind::Relay
        );
        assert_eq!(
            ControlError::Store(ecgate_store::StoreError::NotFound).kind(),
            ErrorKind::Repository
        );
        assert!(ControlError::NoMover("g".into()).is_retriable());
        assert!(!ControlError::Expired.is_retriable());
    }
}
