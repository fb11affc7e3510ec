//! `WAITFORGROUP`: wait until every data file of a pull group was retrieved.

use std::time::Duration;

use chrono::Utc;
use ecgate_core::display_date;
use ecgate_store::{DataFile, Store};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::admission::Requester;
use crate::error::{ControlError, Result};
use crate::request_log::{RequestKind, RequestRecord};
use crate::service::Coordinator;

/// Attempts made to find a group that never showed pending files.
const NOT_FOUND_ATTEMPTS: usize = 10;

/// Below this many pending files the progress lines include per-file details.
const DETAIL_THRESHOLD: usize = 10;

impl<S: Store> Coordinator<S> {
    /// Wait for the group to be fully retrieved.
    ///
    /// Progress lines are sent on `progress` while files are pending. Returns
    /// the completion line.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::GroupNotFound` when the group has no data file,
    /// `ControlError::Transmission` when the progress receiver is gone, or a
    /// storage error.
    pub async fn wait_for_group(
        &self,
        group: &str,
        requester: &Requester,
        progress: &mpsc::Sender<String>,
    ) -> Result<String> {
        let config = self.config();
        if config.log_requests {
            RequestRecord::new(RequestKind::WaitForGroup)
                .field("USER", Some(&requester.user))
                .field("VERSION", Some(&requester.version))
                .field("WAITFORGROUP", Some(group))
                .emit();
        }
        let poll = Duration::from_millis(config.wait_for_group_poll_millis);
        let initial_wait = Duration::from_secs(config.wait_for_group_initial_wait_seconds);
        let refresh = Duration::from_secs(config.wait_for_group_refresh_seconds);

        let started = Instant::now();
        let mut last_detail = started;
        let mut found = false;
        loop {
            let awaiting = self.awaiting_retrieval(group)?;
            if awaiting.is_empty() && (found || started.elapsed() >= initial_wait) {
                break;
            }
            tokio::time::sleep(poll).await;
            if awaiting.is_empty() {
                continue;
            }
            found = true;
            send(
                progress,
                format!(
                    "{}: Still {} DataFile(s) to process for group {group}",
                    display_date(&Utc::now()),
                    awaiting.len()
                ),
            )
            .await?;
            if awaiting.len() < DETAIL_THRESHOLD && last_detail.elapsed() > refresh {
                last_detail = Instant::now();
                for data_file in &awaiting {
                    send(progress, detail_line(data_file)).await?;
                }
            }
        }

        let store = self.store();
        if found {
            self.reset_schedules(group)?;
            tracing::info!(group, "group completed");
            return Ok(format!("Group {group} completed"));
        }

        // The files may have been retrieved before the first poll
        let mut existing = store.list_data_files_by_group(group)?.len();
        for attempt in 1..=NOT_FOUND_ATTEMPTS {
            if existing > 0 {
                break;
            }
            tracing::debug!(group, attempt, "group not found yet");
            tokio::time::sleep(poll).await;
            existing = store.list_data_files_by_group(group)?.len();
        }
        if existing == 0 {
            tracing::warn!(group, "group not found");
            return Err(ControlError::GroupNotFound {
                group: group.to_string(),
                existing,
            });
        }
        self.reset_schedules(group)?;
        tracing::info!(group, existing, "group completed");
        Ok(format!("Group {group} completed ({existing} DataFile(s))"))
    }

    fn awaiting_retrieval(&self, group: &str) -> Result<Vec<DataFile>> {
        let mut data_files = self.store().list_data_files_by_group(group)?;
        data_files.retain(|f| !f.downloaded && !f.deleted);
        Ok(data_files)
    }

    /// Reschedule every transfer of the group for now, when configured.
    fn reset_schedules(&self, group: &str) -> Result<()> {
        if !self.config().reset_schedules_by_group {
            return Ok(());
        }
        let store = self.store();
        let now = Utc::now();
        let mut rows = 0;
        for data_file in store.list_data_files_by_group(group)? {
            for mut transfer in store.list_transfers_by_data_file(data_file.id)? {
                transfer.scheduled_at = now;
                transfer.queued_at = now;
                transfer.retry_at = now;
                store.put_transfer(&transfer)?;
                rows += 1;
            }
        }
        tracing::debug!(group, rows, "transfer schedules reset");
        Ok(())
    }
}

fn detail_line(data_file: &DataFile) -> String {
    let mut line = format!(" >> DataFile {}: ", data_file.id);
    if let (Some(user), Some(host)) = (&data_file.user, &data_file.remote_host) {
        line.push_str(&format!("{user}@{host}->"));
    }
    line.push_str(&format!(
        "{} ({} bytes) - retrieval not started yet",
        data_file.original.as_deref().unwrap_or_default(),
        data_file.size
    ));
    line
}

async fn send(progress: &mpsc::Sender<String>, line: String) -> Result<()> {
    progress
        .send(line)
        .await
        .map_err(|_| ControlError::Transmission("Connection closed while waiting for group".into()))
}
