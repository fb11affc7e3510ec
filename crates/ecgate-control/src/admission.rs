//! Admission of a file, from `PUT` to the first status of its transfers.
//!
//! [`Coordinator::admit`] validates a pending request, takes the unique key,
//! creates or re-queues the records and either finishes at once (group-by mode,
//! purge, duplicates in group-by mode) or returns an [`Admission`] that stays
//! open while the client relays the bytes to a mover.
//!
//! An [`Admission`] holds the key until it is dropped. Dropping it without
//! [`Admission::finalize`] marks its records failed and deleted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use ecgate_core::{display_date, start_of_day, DataFileId, DatePattern, SessionId, TransferId, UniqueKey};
use ecgate_store::{
    DataFile, DataTransfer, Destination, DestinationState, IncomingHistory, Mover, Sequence,
    StatusCode, Store, StoreError, TransferHistory,
};

use crate::aliases::{resolve_aliases, AliasTarget};
use crate::error::{ControlError, Result};
use crate::lifecycle::{commit_status, is_queued, is_valid_transition, record_history, validate_transition};
use crate::locks::{LockOwner, TransferLockGuard};
use crate::metadata::Metadata;
use crate::movers::format_list;
use crate::overrides::{self, key, standby_policy, StandbyPolicy};
use crate::request::PendingRequest;
use crate::request_log::{RequestKind, RequestRecord};
use crate::service::Coordinator;

const ROLLBACK_COMMENT: &str = "Transmission interrupted (session closed before completion)";

const NOT_RETRIEVED_COMMENT: &str = "File not retrieved (source host will be used instead)";

/// The logged-in client on whose behalf a file is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Session of the client.
    pub session_id: SessionId,
    /// User name, `-` for anonymous relays.
    pub user: String,
    /// Origin IP, `-` when relayed by a front-end.
    pub remote_ip: String,
    /// Peer address of the connection.
    pub peer_host: String,
    /// Peer port of the connection.
    pub peer_port: u16,
    /// Client version string.
    pub version: String,
    /// Free-form origin description.
    pub from: Option<String>,
    /// When the session started.
    pub connected_at: DateTime<Utc>,
}

impl Requester {
    /// Owner recorded against the unique key.
    #[must_use]
    pub fn lock_owner(&self) -> LockOwner {
        LockOwner {
            session_id: self.session_id,
            user: self.user.clone(),
            version: self.version.clone(),
            host: self.peer_host.clone(),
            port: self.peer_port,
        }
    }

    /// Host reported in history records.
    #[must_use]
    pub fn host(&self) -> &str {
        if self.remote_ip == "-" {
            &self.peer_host
        } else {
            &self.remote_ip
        }
    }

    /// Transfer comment naming the origin and the user.
    #[must_use]
    pub fn comment(&self) -> String {
        let from = self.from.as_deref().unwrap_or_default();
        if self.user == "-" {
            from.to_string()
        } else {
            format!("{from} ({})", self.user)
        }
    }

    /// Name of the client command.
    #[must_use]
    pub fn command(&self) -> &'static str {
        if self.version.contains("cmd=mspds") {
            "mspds"
        } else {
            "ecpds"
        }
    }

    /// Whether upload history is recorded for this client.
    #[must_use]
    pub fn records_upload(&self) -> bool {
        !self.version.ends_with(" (acquisition)") && !self.version.ends_with(" (other)")
    }

    fn from_acquisition_host(&self) -> bool {
        self.from
            .as_deref()
            .is_some_and(|from| from.starts_with("From Acquisition Host"))
    }
}

/// Outcome of [`Coordinator::admit`].
pub enum Admitted<S: Store> {
    /// Nothing left to relay; the message is the final reply.
    Done(String),
    /// The client must now relay the bytes to one of the movers.
    Relay(Admission<S>),
}

impl<S: Store> fmt::Debug for Admitted<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(message) => f.debug_tuple("Done").field(message).finish(),
            Self::Relay(admission) => f.debug_tuple("Relay").field(admission).finish(),
        }
    }
}

/// An admitted file waiting for its bytes.
pub struct Admission<S: Store> {
    store: Arc<S>,
    _lock: TransferLockGuard,
    requester: Requester,
    data_file: DataFile,
    transfers: Vec<DataTransfer>,
    destinations: HashMap<String, Destination>,
    target: String,
    group_by: Option<String>,
    is_new: bool,
    standby: bool,
    no_retrieval: bool,
    asap: bool,
    candidates: Vec<Mover>,
    superseded: Option<DataFile>,
    error: Option<String>,
    message: String,
    record: Option<RequestRecord>,
    finalized: bool,
}

impl<S: Store> fmt::Debug for Admission<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("data_file_id", &self.data_file.id)
            .field("transfers", &self.transfers.len())
            .field("is_new", &self.is_new)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

impl<S: Store> Admission<S> {
    /// The admitted data file.
    #[must_use]
    pub fn data_file_id(&self) -> DataFileId {
        self.data_file.id
    }

    /// Transfers created or re-queued by the admission.
    #[must_use]
    pub fn transfer_ids(&self) -> Vec<TransferId> {
        self.transfers.iter().map(|t| t.id).collect()
    }

    /// Whether the data file was created by this admission.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    /// Storage path the client sends to the movers.
    #[must_use]
    pub fn target_path(&self) -> &str {
        &self.data_file.storage_path
    }

    /// Candidate movers in the order they should be tried.
    #[must_use]
    pub fn candidates(&self) -> &[Mover] {
        &self.candidates
    }

    /// The `ECPROXY` list.
    #[must_use]
    pub fn mover_list(&self) -> String {
        format_list(&self.candidates)
    }

    /// Reply sent once the admission is finalised.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Final byte count reported by the client.
    pub fn set_size(&mut self, size: i64) {
        self.data_file.size = size;
    }

    /// Record the outcome of the mover hop.
    ///
    /// `+(<mover>|<epoch ms>|<duration>)` names the mover that stored the
    /// bytes; anything else is a transmission error.
    pub fn record_host(&mut self, value: &str) {
        let value = value.trim();
        if let Some(stat) = value.strip_prefix("+(").and_then(|v| v.strip_suffix(')')) {
            if let [host, time, duration] = stat.split('|').collect::<Vec<_>>().as_slice() {
                self.data_file.get_host = Some((*host).to_string());
                self.data_file.get_time = time
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis);
                self.data_file.get_duration = Some((*duration).to_string());
                tracing::debug!(data_file_id = %self.data_file.id, mover = %host, "bytes stored");
                return;
            }
        }
        let reason = value.strip_prefix('-').unwrap_or(value).trim();
        let group = &self.data_file.transfer_group;
        let error = if reason.is_empty() {
            format!("Error during transmission to group {group}")
        } else {
            format!("Error during transmission to group {group} ({reason})")
        };
        tracing::warn!(data_file_id = %self.data_file.id, %error, "relay failed");
        self.error = Some(error);
    }

    /// Compute and persist the first status of every transfer and release the key.
    ///
    /// Returns the reply message.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transmission` after the records were marked
    /// failed when the relay reported an error, or a storage error.
    pub fn finalize(mut self) -> Result<String> {
        if let Some(record) = self.record.take() {
            record.field("SIZE", Some(self.data_file.size)).emit();
        }
        self.persist()?;
        self.finalized = true;
        if let Some(previous) = &self.superseded {
            tracing::info!(
                data_file_id = %previous.id,
                file_instance = ?previous.file_instance,
                storage_path = %previous.storage_path,
                "previous file instance released"
            );
        }
        match self.error.take() {
            Some(error) => Err(ControlError::Transmission(error)),
            None => Ok(std::mem::take(&mut self.message)),
        }
    }

    fn initial_status(&self) -> StatusCode {
        match (&self.group_by, self.no_retrieval, self.standby) {
            (Some(_), false, _) => StatusCode::Sche,
            (Some(_), true, true) | (None, _, true) => StatusCode::Hold,
            (Some(_), true, false) => StatusCode::Wait,
            (None, _, false) if self.is_new => StatusCode::Wait,
            (None, _, false) => StatusCode::Retr,
        }
    }

    fn persist(&mut self) -> Result<()> {
        let store = self.store.as_ref();
        let now = Utc::now();
        let duration_ms =
            u64::try_from((now - self.requester.connected_at).num_milliseconds()).unwrap_or(0);
        let push = self.group_by.is_none();
        let not_downloaded = !push && self.no_retrieval;
        let size = self.data_file.size;
        let mut status = self.initial_status();

        if let Some(error) = &self.error {
            self.data_file.deleted = true;
            self.data_file.removed = true;
            for transfer in &mut self.transfers {
                transfer.deleted = true;
                transfer.comment.clone_from(error);
            }
            status = StatusCode::Fail;
        } else if self.requester.records_upload() && push {
            let message = format!(
                "Uploaded by {} from {} using {} command {} ({} Mbits/s)",
                self.requester.user,
                self.requester.host(),
                self.requester.command(),
                self.requester.version,
                mbits_per_second(size, duration_ms)
            );
            for transfer in &self.transfers {
                store.append_transfer_history(&TransferHistory {
                    transfer_id: transfer.id,
                    destination: transfer.destination.clone(),
                    status,
                    at: now,
                    comment: message.clone(),
                    error: false,
                })?;
                store.append_incoming_history(&IncomingHistory {
                    transfer_id: transfer.id,
                    destination: transfer.destination.clone(),
                    file_name: transfer.target.clone(),
                    file_size: size,
                    scheduled_at: transfer.scheduled_at,
                    started_at: self.requester.connected_at,
                    duration_ms,
                    user: self.requester.user.clone(),
                    host: self.requester.host().to_string(),
                    protocol: self.requester.command().to_string(),
                    meta_stream: self.data_file.meta_stream.clone(),
                    meta_time: self.data_file.meta_time.clone(),
                    time_base: self.data_file.time_base,
                })?;
            }
        }

        if push {
            self.data_file.get_complete_duration_ms = Some(duration_ms);
        }
        store.put_data_file(&self.data_file)?;

        for transfer in &mut self.transfers {
            let destination = self.destinations.get(&transfer.destination);
            let mut this_status = status;
            let mut queued = is_queued(status);
            if let Some(destination) = destination {
                match standby_policy(&destination.policy, &self.target) {
                    StandbyPolicy::Hold if queued => {
                        tracing::debug!(destination = %destination.name, "standby forced by destination");
                        this_status = StatusCode::Hold;
                    }
                    StandbyPolicy::Never if this_status == StatusCode::Hold => {
                        tracing::debug!(destination = %destination.name, "queuing forced by destination");
                        this_status = if self.is_new {
                            StatusCode::Wait
                        } else {
                            StatusCode::Retr
                        };
                        queued = true;
                    }
                    _ => {}
                }
            }
            if push && self.asap {
                transfer.queued_at = now;
                transfer.retry_at = now;
            }
            transfer.size = size;

            let force_stop = self.error.is_none()
                && destination.is_some_and(|d| {
                    d.state == DestinationState::Stopped
                        && overrides::resolve_bool(&d.policy, key::FORCE_STOP, &self.target, false)
                });
            if force_stop {
                this_status = StatusCode::Stop;
                transfer.comment = "Not scheduled (destination is stopped)".to_string();
            } else if this_status == StatusCode::Sche {
                transfer.comment = format!(
                    "Not scheduled yet (queuing required for {})",
                    self.group_by.as_deref().unwrap_or_default()
                );
            } else if this_status == StatusCode::Hold {
                transfer.comment = "Not scheduled yet (manual queuing is required)".to_string();
            } else if queued {
                transfer.comment = if transfer.asap {
                    "Scheduled for as soon as possible".to_string()
                } else {
                    format!(
                        "Scheduled for no sooner than {}",
                        display_date(&transfer.scheduled_at)
                    )
                };
            }
            if push {
                transfer.mover = self
                    .data_file
                    .get_host
                    .clone()
                    .filter(|host| self.candidates.iter().any(|m| &m.name == host));
            }
            commit_status(store, transfer, this_status, None, self.error.is_some())?;
            if not_downloaded && !force_stop {
                record_history(store, transfer, Some(NOT_RETRIEVED_COMMENT), false)?;
            }
        }
        tracing::info!(
            data_file_id = %self.data_file.id,
            transfers = self.transfers.len(),
            status = %status,
            size,
            "admission finalised"
        );
        Ok(())
    }

    fn rollback(&mut self) {
        let store = self.store.as_ref();
        tracing::warn!(
            data_file_id = %self.data_file.id,
            transfers = self.transfers.len(),
            "admission not confirmed, marking records failed"
        );
        self.data_file.deleted = true;
        self.data_file.removed = true;
        let written = store.get_data_file(self.data_file.id).map(|found| found.is_some());
        if let Err(e) = written.and_then(|written| {
            if written {
                store.put_data_file(&self.data_file)
            } else {
                Ok(())
            }
        }) {
            tracing::error!(data_file_id = %self.data_file.id, error = %e, "rollback failed");
        }
        for transfer in &self.transfers {
            let mut current = match store.get_transfer(transfer.id) {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(transfer_id = %transfer.id, error = %e, "rollback failed");
                    continue;
                }
            };
            current.deleted = true;
            current.comment = ROLLBACK_COMMENT.to_string();
            let result = if is_valid_transition(current.status, StatusCode::Fail) {
                commit_status(store, &mut current, StatusCode::Fail, None, true)
            } else {
                store.put_transfer(&current).map_err(ControlError::from)
            };
            if let Err(e) = result {
                tracing::error!(transfer_id = %transfer.id, error = %e, "rollback failed");
            }
        }
    }
}

impl<S: Store> Drop for Admission<S> {
    fn drop(&mut self) {
        if !self.finalized {
            self.rollback();
        }
    }
}

impl<S: Store> Coordinator<S> {
    /// Admit a file for delivery.
    ///
    /// # Errors
    ///
    /// Returns the rejection sent to the client. Nothing is written for
    /// rejections raised before the records are created.
    #[allow(clippy::too_many_lines)]
    pub fn admit(&self, mut request: PendingRequest, requester: &Requester) -> Result<Admitted<S>> {
        let store = self.store();
        let config = self.config();
        if config.force_standby && !requester.from_acquisition_host() {
            tracing::debug!("forcing standby mode");
            request.standby = true;
        }

        let name = request
            .destination
            .clone()
            .ok_or(ControlError::DestinationNotSpecified)?;
        let Some(destination) = store.get_destination(&name)? else {
            if request.group_by.is_some() && !config.fail_on_destination_not_found {
                tracing::error!(destination = %name, "ignoring request for unknown destination");
                return Ok(Admitted::Done(format!(
                    "MESSAGE Destination {name} not found (metadata ignored)"
                )));
            }
            return Err(ControlError::DestinationNotFound(name));
        };

        let now = Utc::now();
        let target = request
            .target
            .clone()
            .or_else(|| request.source.clone())
            .or_else(|| request.original.clone())
            .unwrap_or_default();
        let unique_name = self
            .unique_name(&destination, &request, &target, now)
            .or_else(|| request.unique_name.clone());
        let key = UniqueKey::new(request.standby, &name, &target, unique_name.as_deref());
        let lock = self
            .locks()
            .try_acquire(&key, requester.lock_owner())
            .map_err(|owner| ControlError::AlreadyProcessed {
                owner: owner.to_string(),
                key: key.clone(),
            })?;

        if request.request_id.is_none() && request.original.is_none() {
            return Err(ControlError::Missing("parameters (reqid or destination and source)"));
        }
        let product_date = request
            .metadata
            .product_date
            .unwrap_or_else(|| start_of_day(&request.time_file.unwrap_or(now)));
        let at = request.at.unwrap_or(now);
        let mut start = shift(at, request.delay, "delay")?;
        let mut expiry = shift(start, request.lifetime, "lifetime")?;
        if expiry < now {
            return Err(ControlError::Expired);
        }
        let identity = request.identity.clone().unwrap_or_else(|| target.clone());

        let existing = self.existing_transfers(request.request_id, &key)?;
        let mut superseded = None;
        let (mut data_file, mut transfers, is_new) = if existing.is_empty() {
            if request.purge {
                return Err(ControlError::NothingTo("purge"));
            }
            if request.requeue {
                return Err(ControlError::NothingTo("requeue"));
            }
            let id = DataFileId::new(store.next_id(Sequence::DataFile)?);
            tracing::debug!(data_file_id = %id, key = %key, "creating data file");
            (blank_data_file(id, now), Vec::new(), true)
        } else {
            let mut transfers = existing;
            if request.failed_only {
                transfers.retain(|t| t.status == StatusCode::Fail);
                if transfers.is_empty() {
                    return Err(ControlError::NothingTo("requeue"));
                }
            }
            let mut data_file = store
                .get_data_file(transfers[0].data_file_id)?
                .ok_or(ControlError::Store(StoreError::NotFound))?;
            if !(request.purge || request.requeue || request.force) {
                if request.group_by.is_some() {
                    tracing::debug!(data_file_id = %data_file.id, "data file already there (group-by mode)");
                    return Ok(Admitted::Done(format!(
                        "MESSAGE DataFile already exist with {} DataTransfer(s) (DataFileId={})",
                        transfers.len(),
                        data_file.id
                    )));
                }
                return Err(ControlError::Duplicate {
                    transfers: transfers.len(),
                    data_file_id: data_file.id.as_u64(),
                });
            }
            if request.group_by.is_none()
                && !request.purge
                && self.movers().candidates(&data_file.transfer_group).is_empty()
            {
                return Err(ControlError::NoMover(data_file.transfer_group.clone()));
            }
            for transfer in &transfers {
                validate_transition(transfer.id, transfer.status, StatusCode::Init)?;
            }
            let comment = requester.comment();
            for transfer in &mut transfers {
                transfer.comment.clone_from(&comment);
            }
            if request.purge {
                for transfer in &mut transfers {
                    commit_status(store, transfer, StatusCode::Init, None, false)?;
                }
                store.remove_data_file(data_file.id)?;
                tracing::info!(data_file_id = %data_file.id, transfers = transfers.len(), "data file purged");
                return Ok(Admitted::Done(format!(
                    "MESSAGE Purge completed with {} DataTransfer(s) deleted (DataFileId={})",
                    transfers.len(),
                    data_file.id
                )));
            }
            superseded = Some(data_file.clone());
            data_file.file_instance = Some(data_file.file_instance.map_or(1, |i| i + 1));
            tracing::debug!(
                data_file_id = %data_file.id,
                file_instance = ?data_file.file_instance,
                "overwriting data file"
            );
            (data_file, transfers, false)
        };

        let metadata = &request.metadata;
        data_file.arrived_at = now;
        data_file.host_for_acquisition.clone_from(&request.host_for_acquisition);
        data_file.size = request.size;
        data_file.delete_original = request.remove;
        data_file.standby = request.standby;
        data_file.index = request.index;
        data_file.original.clone_from(&request.original);
        data_file.source.clone_from(&request.source);
        data_file.time_step = metadata.step;
        data_file.meta_time = metadata.meta_time();
        data_file.meta_type.clone_from(&metadata.meta_type);
        data_file.meta_stream = metadata.meta_stream();
        data_file.meta_target = metadata.meta_target();
        data_file.time_base = product_date;
        data_file.time_file = request.time_file;
        data_file.group_by.clone_from(&request.group_by);
        data_file.remote_host = (requester.remote_ip != "-").then(|| requester.remote_ip.clone());
        data_file.user = (requester.user != "-").then(|| requester.user.clone());
        data_file.caller.clone_from(&request.caller);
        data_file.deleted = false;
        data_file.removed = false;

        let policy = &destination.policy;
        if let Some(lifetime) = overrides::resolve_duration(policy, key::LIFETIME, &target) {
            let forced = shift(start, lifetime, "lifetime")?;
            if forced < now {
                tracing::warn!(destination = %name, "forced lifetime would already be expired, ignored");
            } else {
                tracing::debug!(destination = %name, ?lifetime, "lifetime forced by destination");
                expiry = forced;
            }
        }
        if let Some(delay) = overrides::resolve_duration(policy, key::DELAY, &target) {
            tracing::debug!(destination = %name, ?delay, "delay forced by destination");
            start = shift(start, delay, "delay")?;
            expiry = shift(expiry, delay, "delay")?;
        }
        let mut no_retrieval = request.no_retrieval;
        if let Some(value) = overrides::resolve(policy, key::NO_RETRIEVAL, &target) {
            let forced = overrides::as_bool(value);
            if forced != no_retrieval {
                tracing::debug!(destination = %name, forced, "noRetrieval forced by destination");
                no_retrieval = forced;
            }
        }
        data_file.downloaded = request.group_by.is_none() || no_retrieval;
        let asap = overrides::resolve_bool(policy, key::ASAP, &target, request.asap);

        let mut destinations = HashMap::new();
        let candidates;
        if is_new {
            let group = overrides::resolve(policy, key::TRANSFER_GROUP, &target)
                .map(str::to_string)
                .or_else(|| request.transfer_group.clone())
                .unwrap_or_else(|| destination.transfer_group.clone());
            let aliases = resolve_aliases(
                store,
                &destination,
                &target,
                request.priority,
                asap,
                request.event,
            )?;
            for alias in &aliases {
                self.check_access(&alias.destination, &request, requester)?;
            }
            candidates = self.movers().candidates(&group);
            if request.group_by.is_none() && candidates.is_empty() {
                return Err(ControlError::NoMover(group));
            }
            data_file.transfer_group = group;
            data_file.file_instance = None;
            data_file.storage_path = storage_path(&data_file, now);

            let comment = requester.comment();
            for alias in &aliases {
                let expires_at = match alias.lifetime {
                    Some(lifetime) => {
                        let forced = shift(start, lifetime, "lifetime")?;
                        if forced < now {
                            tracing::warn!(alias = %alias.destination.name, "alias lifetime would already be expired, ignored");
                            expiry
                        } else {
                            forced
                        }
                    }
                    None => expiry,
                };
                let scheduled_at = shift(start, alias.delay, "delay")?;
                transfers.push(DataTransfer {
                    id: TransferId::new(store.next_id(Sequence::Transfer)?),
                    data_file_id: data_file.id,
                    destination: alias.destination.name.clone(),
                    target: alias.target.clone(),
                    identity: identity.clone(),
                    priority: alias.priority,
                    status: StatusCode::Init,
                    scheduled_at,
                    queued_at: scheduled_at,
                    retry_at: scheduled_at,
                    expires_at: shift(expires_at, alias.delay, "delay")?,
                    unique_key: key.clone(),
                    comment: format!("{comment}{}", alias.comment_suffix(&name)),
                    size: request.size,
                    sent: 0,
                    asap: alias.asap,
                    event: alias.event,
                    start_count: 0,
                    requeue_count: 0,
                    deleted: false,
                    replicated: no_retrieval,
                    mover: None,
                    time_base: product_date,
                    time_step: metadata.step,
                    finished_at: None,
                });
            }
            for AliasTarget { destination, .. } in aliases {
                destinations.insert(destination.name.clone(), destination);
            }
        } else {
            candidates = self.movers().candidates(&data_file.transfer_group);
            data_file.storage_path = storage_path(&data_file, now);
            for transfer in &mut transfers {
                transfer.scheduled_at = start;
                transfer.queued_at = start;
                transfer.retry_at = start;
                transfer.expires_at = expiry;
                transfer.unique_key = key.clone();
                transfer.priority = request.priority;
                transfer.target.clone_from(&target);
                transfer.asap = asap;
                transfer.event = request.event;
                transfer.start_count = 0;
                transfer.requeue_count = 0;
                transfer.sent = 0;
                transfer.replicated = no_retrieval;
                transfer.mover = None;
                transfer.finished_at = None;
                if !destinations.contains_key(&transfer.destination) {
                    if let Some(found) = store.get_destination(&transfer.destination)? {
                        destinations.insert(found.name.clone(), found);
                    }
                }
            }
        }

        let record = config.log_requests.then(|| put_record(&request, requester));
        let when = if request.standby {
            None
        } else {
            Some(display_date(&start))
        };
        let message = match &request.group_by {
            Some(group) => format!(
                "MESSAGE {} DataTransfer(s) initialized for group {group}: {} (DatafileId={})",
                transfers.len(),
                when.as_deref().unwrap_or("standby mode"),
                data_file.id
            ),
            None => format!(
                "MESSAGE {} DataTransfer(s) {} (DatafileId={}){}",
                transfers.len(),
                when.map_or_else(|| "in standby".to_string(), |when| format!("will start at: {when}")),
                data_file.id,
                if is_new { "" } else { " (updated)" }
            ),
        };

        let mut admission = Admission {
            store: self.store_handle(),
            _lock: lock,
            requester: requester.clone(),
            data_file,
            transfers,
            destinations,
            target,
            group_by: request.group_by.clone(),
            is_new,
            standby: request.standby,
            no_retrieval,
            asap,
            candidates,
            superseded,
            error: None,
            message,
            record,
            finalized: false,
        };

        // Records exist from here on; an early return rolls them back.
        if is_new {
            store.write_admission(&admission.data_file, &admission.transfers)?;
            for transfer in &admission.transfers {
                record_history(store, transfer, None, false)?;
            }
        } else {
            for transfer in &mut admission.transfers {
                commit_status(store, transfer, StatusCode::Init, None, false)?;
            }
            store.put_data_file(&admission.data_file)?;
        }
        self.store_metadata(admission.data_file.id, &request.metadata)?;

        tracing::info!(
            data_file_id = %admission.data_file.id,
            destination = %name,
            transfers = admission.transfers.len(),
            key = %key,
            is_new,
            "file admitted"
        );
        if admission.group_by.is_some() {
            return admission.finalize().map(Admitted::Done);
        }
        Ok(Admitted::Relay(admission))
    }

    fn existing_transfers(
        &self,
        request_id: Option<DataFileId>,
        key: &UniqueKey,
    ) -> Result<Vec<DataTransfer>> {
        let store = self.store();
        let mut transfers = match request_id {
            Some(id) => store.list_transfers_by_data_file(id)?,
            None => store.list_transfers_by_key(key)?,
        };
        transfers.retain(|t| !t.deleted);
        if request_id.is_none() {
            let mut ids: Vec<DataFileId> = Vec::new();
            for transfer in &transfers {
                if !ids.contains(&transfer.data_file_id) {
                    ids.push(transfer.data_file_id);
                }
            }
            if ids.len() > 1 {
                return Err(ControlError::AmbiguousDataFiles {
                    files: ids.len(),
                    transfers: transfers.len(),
                    list: ids
                        .iter()
                        .map(|id| format!("DataFileId={id}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    key: key.clone(),
                });
            }
        }
        Ok(transfers)
    }

    fn unique_name(
        &self,
        destination: &Destination,
        request: &PendingRequest,
        target: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let template = overrides::resolve(&destination.policy, key::VERSION, target)?;
        let pattern = destination
            .policy
            .defaults
            .get(key::DATE_FORMAT)
            .map_or(self.config().default_date_format.as_str(), String::as_str);
        let date = match DatePattern::new(pattern) {
            Ok(pattern) => pattern.format(&now),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid date format in destination policy");
                now.format("%Y%m%d%H%M%S").to_string()
            }
        };
        let time_file = request
            .time_file
            .map_or_else(|| "-1".to_string(), |t| t.timestamp_millis().to_string());
        let name = template
            .replace("$date", &date)
            .replace("$timestamp", &now.timestamp_millis().to_string())
            .replace("$destination", &destination.name)
            .replace("$target", target)
            .replace("$original", request.original.as_deref().unwrap_or_default())
            .replace("$timefile", &time_file);
        tracing::debug!(destination = %destination.name, unique_name = %name, "unique name forced by destination");
        Some(name)
    }

    fn check_access(
        &self,
        destination: &Destination,
        request: &PendingRequest,
        requester: &Requester,
    ) -> Result<()> {
        if request.time_critical {
            if !destination.time_critical {
                return Err(ControlError::AccessDenied {
                    destination: destination.name.clone(),
                    reason: "not a Time-Critical Destination",
                });
            }
            if !destination.authorized_users.contains(&requester.user) {
                return Err(ControlError::AccessDenied {
                    destination: destination.name.clone(),
                    reason: "not an authorised user",
                });
            }
        }
        if destination.max_pending > 0 {
            let pending = self.store().count_pending_transfers(&destination.name)?;
            if pending > destination.max_pending {
                return Err(ControlError::TooManyPending {
                    destination: destination.name.clone(),
                    pending,
                    limit: destination.max_pending,
                });
            }
        }
        if destination.max_file_size > 0
            && u64::try_from(request.size).is_ok_and(|size| size > destination.max_file_size)
        {
            return Err(ControlError::FileTooLarge {
                size: request.size,
                limit: destination.max_file_size,
            });
        }
        Ok(())
    }

    fn store_metadata(&self, id: DataFileId, metadata: &Metadata) -> Result<()> {
        let store = self.store();
        for (name, value) in &metadata.values {
            {
                let _guard = self.metadata_mutexes().lock(name);
                if !store.has_metadata_attribute(name)? {
                    store.put_metadata_attribute(name)?;
                    tracing::debug!(attribute = %name, "metadata attribute registered");
                }
            }
            store.put_metadata_value(id, name, value)?;
        }
        Ok(())
    }
}

fn blank_data_file(id: DataFileId, now: DateTime<Utc>) -> DataFile {
    DataFile {
        id,
        original: None,
        source: None,
        size: -1,
        arrived_at: now,
        time_file: None,
        time_base: now,
        time_step: None,
        meta_stream: "None".to_string(),
        meta_type: None,
        meta_time: "00".to_string(),
        meta_target: "None".to_string(),
        group_by: None,
        transfer_group: String::new(),
        storage_path: String::new(),
        downloaded: false,
        file_instance: None,
        deleted: false,
        removed: false,
        delete_original: false,
        standby: false,
        host_for_acquisition: None,
        index: None,
        user: None,
        remote_host: None,
        caller: None,
        get_host: None,
        get_time: None,
        get_duration: None,
        get_complete_duration_ms: None,
    }
}

/// `date + delta`, rejecting dates out of chrono's range.
fn shift(date: DateTime<Utc>, delta: TimeDelta, option: &str) -> Result<DateTime<Utc>> {
    date.checked_add_signed(delta).ok_or_else(|| {
        ControlError::Invalid(format!(
            "Invalid value specified for the -{option} option (out of range)"
        ))
    })
}

/// Path of a data file on the movers.
fn storage_path(data_file: &DataFile, now: DateTime<Utc>) -> String {
    let mut path = format!(
        "/{}/{}/{}",
        data_file.transfer_group,
        now.format("%Y%m%d"),
        data_file.id
    );
    if let Some(instance) = data_file.file_instance {
        path.push('.');
        path.push_str(&instance.to_string());
    }
    path
}

#[allow(clippy::cast_precision_loss)]
fn mbits_per_second(size: i64, duration_ms: u64) -> String {
    if duration_ms == 0 {
        return "0.00".to_string();
    }
    let bits = size.max(0) as f64 * 8.0;
    format!("{:.2}", bits / (duration_ms as f64 / 1000.0) / 1_000_000.0)
}

fn put_record(request: &PendingRequest, requester: &Requester) -> RequestRecord {
    RequestRecord::new(RequestKind::Put)
        .field("USER", Some(&requester.user))
        .field("VERSION", Some(&requester.version))
        .field("FROM", requester.from.as_ref())
        .field("DESTINATION", request.destination.as_ref())
        .field("SOURCE", request.source.as_ref())
        .field("ORIGINAL", request.original.as_ref())
        .field("TARGET", request.target.as_ref())
        .field("TIMEFILE", request.time_file_text.as_ref())
        .field("PRIORITY", Some(request.priority))
        .field("LIFETIME", request.lifetime_text.as_ref())
        .field("AT", request.at_text.as_ref())
        .field("FORMAT", Some(&request.date_format))
        .field("METADATA", request.metadata.raw.as_ref())
        .field("GROUPBY", request.group_by.as_ref())
        .field("UNIQUENAME", request.unique_name.as_ref())
        .field("IDENTITY", request.identity.as_ref())
        .field("CALLER", request.caller.as_ref())
        .field("STANDBY", request.standby.then_some("true"))
        .field("ASAP", request.asap.then_some("true"))
        .field("REQUEUE", request.requeue.then_some("true"))
        .field("FORCE", request.force.then_some("true"))
}
