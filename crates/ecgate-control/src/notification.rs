//! Product status notifications (`EXPECTED`, `STARTED`, `COMPLETED`, `RESET`).

use chrono::{DateTime, TimeDelta, Utc};
use ecgate_core::{start_of_day, ProductId};
use ecgate_store::{ProductState, ProductStatus, Sequence, Store};

use crate::admission::Requester;
use crate::error::{ControlError, Result};
use crate::request::PendingRequest;
use crate::request_log::{RequestKind, RequestRecord};
use crate::service::Coordinator;

/// Reply sent when a notification names an unknown product without `AT`.
const NOT_FOUND_MESSAGE: &str = "Product status not found (-at option required)";

impl<S: Store> Coordinator<S> {
    /// Record a product notification and return the reply message.
    ///
    /// # Errors
    ///
    /// Returns an error for missing stream, time or step, for an unknown
    /// product without `AT` when such notifications are not ignored, or a
    /// storage error.
    pub fn notify(
        &self,
        state: ProductState,
        request: &PendingRequest,
        requester: &Requester,
    ) -> Result<String> {
        if self.config().log_requests {
            let kind = match state {
                ProductState::Init => RequestKind::Expected,
                ProductState::Exec => RequestKind::Started,
                ProductState::Done => RequestKind::Completed,
            };
            let mut record = RequestRecord::new(kind)
                .field("USER", Some(&requester.user))
                .field("VERSION", Some(&requester.version))
                .field("METADATA", request.metadata.raw.as_ref());
            if state == ProductState::Init {
                record = record
                    .field("AT", request.at_text.as_ref())
                    .field("FORMAT", Some(&request.date_format));
            }
            record.emit();
        }

        let metadata = &request.metadata;
        let (Some(stream), Some(time), Some(step)) =
            (product_stream(request), metadata.time.as_deref(), metadata.step)
        else {
            return Err(ControlError::Missing("metadata value(s) (stream, time and/or step)"));
        };
        let product_type = metadata.meta_type.as_deref();
        let _guard = self.product_mutexes().lock(&format!(
            "{stream}{time}{step}{}",
            product_type.unwrap_or_default()
        ));

        let store = self.store();
        let existing = store.get_product_status(&stream, time, step, product_type)?;
        let schedule_time = match (&existing, request.at) {
            (_, Some(at)) => at,
            (Some(product), None) => product.schedule_time,
            (None, None) => {
                tracing::warn!(%stream, time, step, "{NOT_FOUND_MESSAGE}");
                if self.config().ignore_missing_schedule_time {
                    return Ok(format!("MESSAGE {NOT_FOUND_MESSAGE}"));
                }
                return Err(ControlError::ProductNotFound);
            }
        };

        if let Some(product) = &existing {
            let ignored = match state {
                ProductState::Init if Some(product.schedule_time) == request.at => {
                    Some("Product status already expected (notification ignored)")
                }
                ProductState::Exec if product.status != ProductState::Init => {
                    Some("Product status not expected (notification ignored)")
                }
                ProductState::Done if product.status == ProductState::Done => {
                    Some("Product status already completed (notification ignored)")
                }
                _ => None,
            };
            if let Some(message) = ignored {
                tracing::warn!(product_id = %product.id, %stream, time, step, "{message}");
                return Ok(format!("MESSAGE {message}"));
            }
        }

        let now = Utc::now();
        let id = match &existing {
            Some(product) => product.id,
            None => ProductId::new(store.next_id(Sequence::Product)?),
        };
        let product = ProductStatus {
            id,
            stream: stream.clone(),
            time: time.to_string(),
            step,
            product_type: product_type.map(str::to_string),
            status: state,
            time_base: metadata
                .product_date
                .unwrap_or_else(|| start_of_day(&request.time_file.unwrap_or(now))),
            schedule_time,
            last_update: next_update(existing.as_ref().map(|p| p.last_update), now),
            buffer_ms: request.buffer.map(|buffer| buffer.num_milliseconds()),
            user: Some(requester.user.clone()),
            comment: requester.from.clone(),
        };
        store.put_product_status(&product)?;
        tracing::info!(
            product_id = %product.id,
            %stream,
            time,
            step,
            status = state.name(),
            schedule_time = %product.schedule_time,
            "product status updated"
        );
        Ok(format!(
            "MESSAGE Product status {} {} (ProductId={})",
            if existing.is_some() { "updated to" } else { "created as" },
            state.name(),
            product.id
        ))
    }

    /// Reset product statuses back to expected and return the reply message.
    ///
    /// Without stream and time every product is reset; otherwise both are
    /// required and the step restricts the reset when it is set.
    ///
    /// # Errors
    ///
    /// Returns an error when only one of stream and time is set, or a storage error.
    pub fn reset_products(&self, request: &PendingRequest) -> Result<String> {
        let store = self.store();
        let stream = product_stream(request);
        let time = request.metadata.time.as_deref();
        let filter = match (stream.as_deref(), time) {
            (None, None) => None,
            (Some(stream), Some(time)) => Some((stream, time)),
            _ => return Err(ControlError::Missing("metadata value(s) (stream and/or time)")),
        };
        let step = request.metadata.step.filter(|step| *step >= 0);

        let now = Utc::now();
        let mut reset = 0_usize;
        let products = store.list_product_statuses(filter)?;
        for mut product in products.iter().cloned() {
            if filter.is_some() && step.is_some_and(|step| step != product.step) {
                continue;
            }
            let _guard = self.product_mutexes().lock(&format!(
                "{}{}{}{}",
                product.stream,
                product.time,
                product.step,
                product.product_type.as_deref().unwrap_or_default()
            ));
            product.status = ProductState::Init;
            product.last_update = next_update(Some(product.last_update), now);
            if let Err(e) = store.put_product_status(&product) {
                tracing::warn!(product_id = %product.id, error = %e, "product reset failed");
                continue;
            }
            reset += 1;
        }
        match filter {
            None => {
                tracing::info!(products = products.len(), reset, "all product statuses reset");
                Ok(format!("MESSAGE {} product(s) status reseted", products.len()))
            }
            Some((stream, time)) => {
                tracing::debug!(stream, time, ?step, reset, "product statuses reset");
                Ok("MESSAGE Product status reseted".to_string())
            }
        }
    }
}

/// Stream of a product: the domain followed by the stream metadata.
fn product_stream(request: &PendingRequest) -> Option<String> {
    let metadata = &request.metadata;
    metadata.stream.as_ref().map(|stream| {
        format!("{}{stream}", metadata.domain.as_deref().unwrap_or_default())
    })
}

/// Update time after `last`, bumped by one millisecond when the clock is behind.
fn next_update(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if last >= now => {
            let resynchronized = last + TimeDelta::milliseconds(1);
            tracing::warn!(last_update = %resynchronized, "last update resynchronized");
            resynchronized
        }
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControlConfig;
    use ecgate_core::SessionId;
    use ecgate_store::RocksStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(config: ControlConfig) -> (Coordinator<RocksStore>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (Coordinator::new(Arc::clone(&store), config), store, dir)
    }

    fn requester() -> Requester {
        Requester {
            session_id: SessionId::generate(),
            user: "producer".into(),
            remote_ip: "10.0.0.9".into(),
            peer_host: "10.0.0.9".into(),
            peer_port: 700,
            version: "6.7.0 (acquisition)".into(),
            from: Some("From the ecpds command at 10.0.0.9".into()),
            connected_at: Utc::now(),
        }
    }

    fn request(metadata: &str, at: Option<&str>) -> PendingRequest {
        let mut request = PendingRequest::new(&ControlConfig::default());
        request.metadata.apply(metadata, true).unwrap();
        if let Some(at) = at {
            request.set_at(at).unwrap();
        }
        request
    }

    #[test]
    fn lifecycle_of_a_product() {
        let (coordinator, store, _dir) = setup(ControlConfig::default());
        let metadata = "domain=ec,stream=oper,time=12,step=24";

        let reply = coordinator
            .notify(ProductState::Init, &request(metadata, Some("20240101180000")), &requester())
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status created as Expected (ProductId=1)");

        let reply = coordinator
            .notify(ProductState::Init, &request(metadata, Some("20240101180000")), &requester())
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status already expected (notification ignored)");

        let reply = coordinator
            .notify(ProductState::Exec, &request(metadata, None), &requester())
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status updated to Started (ProductId=1)");

        let reply = coordinator
            .notify(ProductState::Exec, &request(metadata, None), &requester())
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status not expected (notification ignored)");

        coordinator
            .notify(ProductState::Done, &request(metadata, None), &requester())
            .unwrap();
        let reply = coordinator
            .notify(ProductState::Done, &request(metadata, None), &requester())
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status already completed (notification ignored)");

        let product = store.get_product_status("ecoper", "12", 24, None).unwrap().unwrap();
        assert_eq!(product.status, ProductState::Done);
        assert_eq!(product.schedule_time.timestamp(), 1_704_132_000);
        assert_eq!(product.user.as_deref(), Some("producer"));
    }

    #[test]
    fn missing_values_and_unknown_products() {
        let (coordinator, _store, _dir) = setup(ControlConfig::default());
        let err = coordinator
            .notify(ProductState::Init, &request("stream=oper,time=12", None), &requester())
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing metadata value(s) (stream, time and/or step)");

        let reply = coordinator
            .notify(ProductState::Exec, &request("stream=oper,time=12,step=0", None), &requester())
            .unwrap();
        assert_eq!(reply, format!("MESSAGE {NOT_FOUND_MESSAGE}"));

        let config = ControlConfig {
            ignore_missing_schedule_time: false,
            ..ControlConfig::default()
        };
        let (coordinator, _store, _dir) = setup(config);
        let err = coordinator
            .notify(ProductState::Exec, &request("stream=oper,time=12,step=0", None), &requester())
            .unwrap_err();
        assert!(matches!(err, ControlError::ProductNotFound));
    }

    #[test]
    fn last_update_is_strictly_increasing() {
        let now = Utc::now();
        assert_eq!(next_update(None, now), now);
        assert_eq!(next_update(Some(now - TimeDelta::seconds(1)), now), now);
        assert_eq!(next_update(Some(now), now), now + TimeDelta::milliseconds(1));
    }

    #[test]
    fn reset() {
        let (coordinator, store, _dir) = setup(ControlConfig::default());
        for metadata in ["stream=oper,time=00,step=0", "stream=oper,time=00,step=6", "stream=enfo,time=12,step=0"] {
            coordinator
                .notify(ProductState::Init, &request(metadata, Some("20240101060000")), &requester())
                .unwrap();
            coordinator
                .notify(ProductState::Exec, &request(metadata, None), &requester())
                .unwrap();
        }

        let err = coordinator.reset_products(&request("stream=oper", None)).unwrap_err();
        assert_eq!(err.to_string(), "Missing metadata value(s) (stream and/or time)");

        let reply = coordinator
            .reset_products(&request("stream=oper,time=00,step=6", None))
            .unwrap();
        assert_eq!(reply, "MESSAGE Product status reseted");
        let statuses: Vec<_> = store
            .list_product_statuses(Some(("oper", "00")))
            .unwrap()
            .into_iter()
            .map(|p| (p.step, p.status))
            .collect();
        assert!(statuses.contains(&(0, ProductState::Exec)));
        assert!(statuses.contains(&(6, ProductState::Init)));

        let reply = coordinator.reset_products(&request("", None)).unwrap();
        assert_eq!(reply, "MESSAGE 3 product(s) status reseted");
        assert!(store
            .list_product_statuses(None)
            .unwrap()
            .iter()
            .all(|p| p.status == ProductState::Init));
    }
}
