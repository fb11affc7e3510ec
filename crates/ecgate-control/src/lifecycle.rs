//! Transfer status state machine.
//!
//! This module defines the valid status transitions of a transfer and the single
//! write path used to apply one, which also appends the history record.
//!
//! # State Machine
//!
//! ```text
//!                        (any status)
//!                             │ requeue
//!                             ▼
//!                      ┌─────────────┐
//!      ┌───────────────│    INIT     │────────────────┐
//!      │               └──────┬──────┘                │
//!      │ push, new            │ pull          standby │
//!      ▼                      ▼                       ▼
//!  ┌──────┐  ┌──────┐    ┌──────┐                ┌──────┐
//!  │ WAIT │  │ RETR │    │ SCHE │                │ HOLD │
//!  └──┬───┘  └──┬───┘    └──┬───┘                └──┬───┘
//!     │         │           │   (WAIT, RETR, SCHE)──┘ │
//!     └─────────┴─────┬─────┘                         │ release
//!                     ▼                               ▼
//!                ┌────────┐   failure          WAIT / RETR
//!                │  FETC  │──────────▶ RETR
//!                └───┬────┘
//!                    ▼
//!                ┌────────┐
//!                │  DONE  │
//!                └────────┘
//!
//!  STOP and FAIL are reachable from every non-terminal status;
//!  STOP resumes to WAIT, RETR or HOLD and FAIL to RETR.
//! ```

use chrono::Utc;
use ecgate_core::TransferId;
use ecgate_store::{DataTransfer, StatusCode, Store, TransferHistory};

use crate::error::{ControlError, Result};

/// Validates a status transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    transfer_id: TransferId,
    from: StatusCode,
    to: StatusCode,
) -> Result<StatusCode> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidTransition {
            transfer_id,
            from,
            to,
        })
    }
}

/// Check if a status transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: StatusCode, to: StatusCode) -> bool {
    use StatusCode::{Fail, Fetc, Hold, Init, Retr, Sche, Stop, Wait};

    matches!(
        (from, to),
        // Requeue resets from anywhere
        (_, Init)
            // Finalisation of an admission
            | (Init, Wait | Hold | Sche | Retr | Stop | Fail)
            // Queued transfers are picked up, held, stopped or failed
            | (Sche | Wait | Retr, Fetc | Hold | Stop | Fail)
            // Released from standby
            | (Hold, Wait | Retr | Stop | Fail)
            // Delivery outcome
            | (Fetc, Done | Retr | Fail | Stop)
            // Resumed after a stop
            | (Stop, Wait | Retr | Hold)
            // Retried after a failure
            | (Fail, Retr)
    )
}

/// Returns the list of valid target statuses from the given status.
#[must_use]
pub fn valid_transitions_from(status: StatusCode) -> Vec<StatusCode> {
    StatusCode::ALL
        .into_iter()
        .filter(|to| is_valid_transition(status, *to))
        .collect()
}

/// Returns true once a transfer needs no further work.
#[must_use]
pub const fn is_terminal(status: StatusCode) -> bool {
    matches!(status, StatusCode::Done)
}

/// Returns true if the transfer is queued for delivery.
#[must_use]
pub const fn is_queued(status: StatusCode) -> bool {
    matches!(status, StatusCode::Wait | StatusCode::Retr)
}

/// Apply a status change: validate it, persist the transfer and append its history.
///
/// The transfer's comment is recorded in the history when `comment` is `None`.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` for a transition outside the state
/// machine, or a storage error.
pub fn commit_status<S: Store + ?Sized>(
    store: &S,
    transfer: &mut DataTransfer,
    to: StatusCode,
    comment: Option<&str>,
    error: bool,
) -> Result<()> {
    validate_transition(transfer.id, transfer.status, to)?;
    let from = transfer.status;
    transfer.status = to;
    store.put_transfer(transfer)?;
    record_history(store, transfer, comment, error)?;
    tracing::debug!(
        transfer_id = %transfer.id,
        destination = %transfer.destination,
        from = %from,
        to = %to,
        "transfer status changed"
    );
    Ok(())
}

/// Append a history record for the transfer's current status.
///
/// # Errors
///
/// Returns a storage error.
pub fn record_history<S: Store + ?Sized>(
    store: &S,
    transfer: &DataTransfer,
    comment: Option<&str>,
    error: bool,
) -> Result<()> {
    store.append_transfer_history(&TransferHistory {
        transfer_id: transfer.id,
        destination: transfer.destination.clone(),
        status: transfer.status,
        at: Utc::now(),
        comment: comment.unwrap_or(&transfer.comment).to_string(),
        error,
    })?;
    Ok(())
}
