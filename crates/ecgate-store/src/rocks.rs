//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use ecgate_core::{DataFileId, TransferId, UniqueKey};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{
    DataFile, DataTransfer, Destination, IncomingHistory, Mover, ProductStatus, TransferHistory,
};
use crate::{Sequence, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    sequence_lock: Mutex<()>,
}

fn db_error(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_error)?;

        Ok(Self {
            db: Arc::new(db),
            sequence_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode one record.
    fn get<T: serde::de::DeserializeOwned>(&self, name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect the `(key, value)` pairs starting with `prefix`.
    fn scan_prefix(&self, name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(db_error)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    /// Decode every value of a column family.
    fn scan_all<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(db_error)?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Load the transfers referenced by the trailing ids of an index scan.
    fn transfers_from_index(&self, name: &str, prefix: &[u8]) -> Result<Vec<DataTransfer>> {
        let mut transfers = Vec::new();
        for (key, _) in self.scan_prefix(name, prefix)? {
            let id = TransferId::new(keys::trailing_id(&key)?);
            if let Some(transfer) = self.get_transfer(id)? {
                transfers.push(transfer);
            }
        }
        Ok(transfers)
    }

    /// Stage a data file and its group index entry.
    fn stage_data_file(&self, batch: &mut WriteBatch, data_file: &DataFile) -> Result<()> {
        let cf_files = self.cf(cf::DATA_FILES)?;
        let cf_by_group = self.cf(cf::DATA_FILES_BY_GROUP)?;

        let old_group = self
            .get_data_file(data_file.id)?
            .and_then(|old| old.group_by);
        if let Some(old) = old_group {
            if data_file.group_by.as_deref() != Some(old.as_str()) {
                batch.delete_cf(&cf_by_group, keys::group_data_file_key(&old, data_file.id));
            }
        }

        batch.put_cf(
            &cf_files,
            keys::data_file_key(data_file.id),
            Self::serialize(data_file)?,
        );
        if let Some(group) = &data_file.group_by {
            batch.put_cf(&cf_by_group, keys::group_data_file_key(group, data_file.id), []);
        }
        Ok(())
    }

    /// Stage a transfer and its index entries, dropping stale ones.
    fn stage_transfer(&self, batch: &mut WriteBatch, transfer: &DataTransfer) -> Result<()> {
        let cf_transfers = self.cf(cf::TRANSFERS)?;
        let cf_by_key = self.cf(cf::TRANSFERS_BY_KEY)?;
        let cf_by_file = self.cf(cf::TRANSFERS_BY_DATA_FILE)?;
        let cf_by_destination = self.cf(cf::TRANSFERS_BY_DESTINATION)?;

        if let Some(old) = self.get_transfer(transfer.id)? {
            if old.unique_key != transfer.unique_key {
                batch.delete_cf(
                    &cf_by_key,
                    keys::unique_key_transfer_key(&old.unique_key, old.id),
                );
            }
            if old.data_file_id != transfer.data_file_id {
                batch.delete_cf(
                    &cf_by_file,
                    keys::data_file_transfer_key(old.data_file_id, old.id),
                );
            }
            if old.destination != transfer.destination {
                batch.delete_cf(
                    &cf_by_destination,
                    keys::destination_transfer_key(&old.destination, old.id),
                );
            }
        }

        batch.put_cf(
            &cf_transfers,
            keys::transfer_key(transfer.id),
            Self::serialize(transfer)?,
        );
        batch.put_cf(
            &cf_by_key,
            keys::unique_key_transfer_key(&transfer.unique_key, transfer.id),
            [],
        );
        batch.put_cf(
            &cf_by_file,
            keys::data_file_transfer_key(transfer.data_file_id, transfer.id),
            [],
        );
        batch.put_cf(
            &cf_by_destination,
            keys::destination_transfer_key(&transfer.destination, transfer.id),
            [],
        );
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Sequences
    // =========================================================================

    fn next_id(&self, sequence: Sequence) -> Result<u64> {
        let cf = self.cf(cf::SEQUENCES)?;
        let _guard = self.sequence_lock.lock();

        let current = match self.db.get_cf(&cf, sequence.name()).map_err(db_error)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Serialization(format!("corrupt sequence {}", sequence.name()))
                })?;
                u64::from_be_bytes(arr)
            }
            None => 0,
        };
        let next = current + 1;
        self.db
            .put_cf(&cf, sequence.name(), next.to_be_bytes())
            .map_err(db_error)?;
        Ok(next)
    }

    // =========================================================================
    // Destination and Mover Operations
    // =========================================================================

    fn put_destination(&self, destination: &Destination) -> Result<()> {
        let cf = self.cf(cf::DESTINATIONS)?;
        self.db
            .put_cf(&cf, destination.name.as_bytes(), Self::serialize(destination)?)
            .map_err(db_error)
    }

    fn get_destination(&self, name: &str) -> Result<Option<Destination>> {
        self.get(cf::DESTINATIONS, name.as_bytes())
    }

    fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.scan_all(cf::DESTINATIONS)
    }

    fn put_mover(&self, mover: &Mover) -> Result<()> {
        let cf = self.cf(cf::MOVERS)?;
        self.db
            .put_cf(&cf, mover.name.as_bytes(), Self::serialize(mover)?)
            .map_err(db_error)
    }

    fn list_movers(&self) -> Result<Vec<Mover>> {
        self.scan_all(cf::MOVERS)
    }

    // =========================================================================
    // Data File Operations
    // =========================================================================

    fn put_data_file(&self, data_file: &DataFile) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_data_file(&mut batch, data_file)?;
        self.db.write(batch).map_err(db_error)
    }

    fn get_data_file(&self, id: DataFileId) -> Result<Option<DataFile>> {
        self.get(cf::DATA_FILES, &keys::data_file_key(id))
    }

    fn list_data_files_by_group(&self, group: &str) -> Result<Vec<DataFile>> {
        let mut files = Vec::new();
        for (key, _) in self.scan_prefix(cf::DATA_FILES_BY_GROUP, &keys::group_prefix(group))? {
            let id = DataFileId::new(keys::trailing_id(&key)?);
            if let Some(file) = self.get_data_file(id)? {
                files.push(file);
            }
        }
        Ok(files)
    }

    fn remove_data_file(&self, id: DataFileId) -> Result<usize> {
        let data_file = self.get_data_file(id)?.ok_or(StoreError::NotFound)?;
        let transfers = self.list_transfers_by_data_file(id)?;

        let cf_files = self.cf(cf::DATA_FILES)?;
        let cf_by_group = self.cf(cf::DATA_FILES_BY_GROUP)?;
        let cf_transfers = self.cf(cf::TRANSFERS)?;
        let cf_by_key = self.cf(cf::TRANSFERS_BY_KEY)?;
        let cf_by_file = self.cf(cf::TRANSFERS_BY_DATA_FILE)?;
        let cf_by_destination = self.cf(cf::TRANSFERS_BY_DESTINATION)?;
        let cf_values = self.cf(cf::METADATA_VALUES)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_files, keys::data_file_key(id));
        if let Some(group) = &data_file.group_by {
            batch.delete_cf(&cf_by_group, keys::group_data_file_key(group, id));
        }
        for transfer in &transfers {
            batch.delete_cf(&cf_transfers, keys::transfer_key(transfer.id));
            batch.delete_cf(
                &cf_by_key,
                keys::unique_key_transfer_key(&transfer.unique_key, transfer.id),
            );
            batch.delete_cf(&cf_by_file, keys::data_file_transfer_key(id, transfer.id));
            batch.delete_cf(
                &cf_by_destination,
                keys::destination_transfer_key(&transfer.destination, transfer.id),
            );
        }
        for (key, _) in self.scan_prefix(cf::METADATA_VALUES, &keys::data_file_key(id))? {
            batch.delete_cf(&cf_values, key);
        }

        self.db.write(batch).map_err(db_error)?;
        tracing::debug!(data_file_id = %id, transfers = transfers.len(), "data file removed");
        Ok(transfers.len())
    }

    // =========================================================================
    // Transfer Operations
    // =========================================================================

    fn put_transfer(&self, transfer: &DataTransfer) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transfer(&mut batch, transfer)?;
        self.db.write(batch).map_err(db_error)
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<DataTransfer>> {
        self.get(cf::TRANSFERS, &keys::transfer_key(id))
    }

    fn list_transfers_by_key(&self, key: &UniqueKey) -> Result<Vec<DataTransfer>> {
        let transfers =
            self.transfers_from_index(cf::TRANSFERS_BY_KEY, &keys::unique_key_prefix(key))?;
        // Digest collisions are not expected, but the textual key is authoritative.
        Ok(transfers
            .into_iter()
            .filter(|t| &t.unique_key == key)
            .collect())
    }

    fn list_transfers_by_data_file(&self, id: DataFileId) -> Result<Vec<DataTransfer>> {
        self.transfers_from_index(cf::TRANSFERS_BY_DATA_FILE, &keys::data_file_prefix(id))
    }

    fn list_transfers_by_destination(&self, destination: &str) -> Result<Vec<DataTransfer>> {
        self.transfers_from_index(
            cf::TRANSFERS_BY_DESTINATION,
            &keys::destination_prefix(destination),
        )
    }

    fn count_pending_transfers(&self, destination: &str) -> Result<u64> {
        let transfers = self.list_transfers_by_destination(destination)?;
        Ok(transfers
            .iter()
            .filter(|t| !t.deleted && t.status.is_pending())
            .count() as u64)
    }

    fn write_admission(&self, data_file: &DataFile, transfers: &[DataTransfer]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_data_file(&mut batch, data_file)?;
        for transfer in transfers {
            self.stage_transfer(&mut batch, transfer)?;
        }
        self.db.write(batch).map_err(db_error)
    }

    // =========================================================================
    // History Operations
    // =========================================================================

    fn append_transfer_history(&self, history: &TransferHistory) -> Result<()> {
        let cf = self.cf(cf::TRANSFER_HISTORY)?;
        let sequence = self.next_id(Sequence::History)?;
        self.db
            .put_cf(
                &cf,
                keys::history_key(history.transfer_id, sequence),
                Self::serialize(history)?,
            )
            .map_err(db_error)
    }

    fn list_transfer_history(&self, id: TransferId) -> Result<Vec<TransferHistory>> {
        self.scan_prefix(cf::TRANSFER_HISTORY, &keys::transfer_key(id))?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    fn append_incoming_history(&self, history: &IncomingHistory) -> Result<()> {
        let cf = self.cf(cf::INCOMING_HISTORY)?;
        let sequence = self.next_id(Sequence::History)?;
        self.db
            .put_cf(
                &cf,
                keys::history_key(history.transfer_id, sequence),
                Self::serialize(history)?,
            )
            .map_err(db_error)
    }

    fn list_incoming_history(&self, id: TransferId) -> Result<Vec<IncomingHistory>> {
        self.scan_prefix(cf::INCOMING_HISTORY, &keys::transfer_key(id))?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    // =========================================================================
    // Product Status Operations
    // =========================================================================

    fn get_product_status(
        &self,
        stream: &str,
        time: &str,
        step: i64,
        product_type: Option<&str>,
    ) -> Result<Option<ProductStatus>> {
        self.get(
            cf::PRODUCT_STATUS,
            &keys::product_key(stream, time, step, product_type),
        )
    }

    fn put_product_status(&self, product: &ProductStatus) -> Result<()> {
        let cf = self.cf(cf::PRODUCT_STATUS)?;
        let key = keys::product_key(
            &product.stream,
            &product.time,
            product.step,
            product.product_type.as_deref(),
        );
        self.db
            .put_cf(&cf, key, Self::serialize(product)?)
            .map_err(db_error)
    }

    fn list_product_statuses(&self, filter: Option<(&str, &str)>) -> Result<Vec<ProductStatus>> {
        match filter {
            None => self.scan_all(cf::PRODUCT_STATUS),
            Some((stream, time)) => self
                .scan_prefix(cf::PRODUCT_STATUS, &keys::product_prefix(stream, time))?
                .iter()
                .map(|(_, value)| Self::deserialize(value))
                .collect(),
        }
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    fn has_metadata_attribute(&self, name: &str) -> Result<bool> {
        let cf = self.cf(cf::METADATA_ATTRIBUTES)?;
        Ok(self.db.get_cf(&cf, name.as_bytes()).map_err(db_error)?.is_some())
    }

    fn put_metadata_attribute(&self, name: &str) -> Result<()> {
        let cf = self.cf(cf::METADATA_ATTRIBUTES)?;
        self.db.put_cf(&cf, name.as_bytes(), []).map_err(db_error)
    }

    fn put_metadata_value(&self, id: DataFileId, name: &str, value: &str) -> Result<()> {
        let cf = self.cf(cf::METADATA_VALUES)?;
        self.db
            .put_cf(&cf, keys::metadata_value_key(id, name), value.as_bytes())
            .map_err(db_error)
    }

    fn list_metadata_values(&self, id: DataFileId) -> Result<Vec<(String, String)>> {
        let prefix = keys::data_file_key(id);
        self.scan_prefix(cf::METADATA_VALUES, &prefix)?
            .iter()
            .map(|(key, value)| {
                let name = String::from_utf8(key[prefix.len()..].to_vec())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let value = String::from_utf8(value.to_vec())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok((name, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductState, StatusCode};
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_file(id: u64, group_by: Option<&str>) -> DataFile {
        let now = Utc::now();
        DataFile {
            id: DataFileId::new(id),
            original: Some("/data/file.grib".to_string()),
            source: None,
            size: 10,
            arrived_at: now,
            time_file: None,
            time_base: now,
            time_step: None,
            meta_stream: "None".to_string(),
            meta_type: None,
            meta_time: "00".to_string(),
            meta_target: "None".to_string(),
            group_by: group_by.map(str::to_string),
            transfer_group: "default".to_string(),
            storage_path: format!("/default/{id}"),
            downloaded: group_by.is_none(),
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

    fn create_test_transfer(id: u64, file: DataFileId, destination: &str) -> DataTransfer {
        let now = Utc::now();
        DataTransfer {
            id: TransferId::new(id),
            data_file_id: file,
            destination: destination.to_string(),
            target: "file.grib".to_string(),
            identity: "file.grib".to_string(),
            priority: 99,
            status: StatusCode::Init,
            scheduled_at: now,
            queued_at: now,
            retry_at: now,
            expires_at: now,
            unique_key: UniqueKey::new(false, destination, "file.grib", None),
            comment: String::new(),
            size: 10,
            sent: 0,
            asap: false,
            event: false,
            start_count: 0,
            requeue_count: 0,
            deleted: false,
            replicated: false,
            mover: None,
            time_base: now,
            time_step: None,
            finished_at: None,
        }
    }

    #[test]
    fn sequences_are_independent_and_monotonic() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.next_id(Sequence::DataFile).unwrap(), 1);
        assert_eq!(store.next_id(Sequence::DataFile).unwrap(), 2);
        assert_eq!(store.next_id(Sequence::Transfer).unwrap(), 1);
    }

    #[test]
    fn sequences_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.next_id(Sequence::Transfer).unwrap();
            store.next_id(Sequence::Transfer).unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.next_id(Sequence::Transfer).unwrap(), 3);
    }

    #[test]
    fn destination_and_mover_crud() {
        let (store, _dir) = create_test_store();
        store.put_destination(&Destination::new("a")).unwrap();
        store.put_destination(&Destination::new("b")).unwrap();
        assert!(store.get_destination("a").unwrap().is_some());
        assert!(store.get_destination("c").unwrap().is_none());
        assert_eq!(store.list_destinations().unwrap().len(), 2);

        let mover = Mover {
            name: "m1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1234,
            transfer_group: "default".to_string(),
            active: true,
        };
        store.put_mover(&mover).unwrap();
        assert_eq!(store.list_movers().unwrap(), vec![mover]);
    }

    #[test]
    fn admission_writes_file_and_indexes() {
        let (store, _dir) = create_test_store();
        let file = create_test_file(1, None);
        let t1 = create_test_transfer(1, file.id, "dest");
        let mut t2 = create_test_transfer(2, file.id, "alias");
        t2.unique_key = t1.unique_key.clone();
        store.write_admission(&file, &[t1.clone(), t2]).unwrap();

        assert_eq!(store.get_data_file(file.id).unwrap().unwrap(), file);
        assert_eq!(store.list_transfers_by_key(&t1.unique_key).unwrap().len(), 2);
        assert_eq!(store.list_transfers_by_data_file(file.id).unwrap().len(), 2);
        assert_eq!(store.list_transfers_by_destination("dest").unwrap().len(), 1);
        assert_eq!(store.count_pending_transfers("alias").unwrap(), 1);
    }

    #[test]
    fn pending_count_ignores_finished_and_deleted() {
        let (store, _dir) = create_test_store();
        let file = create_test_file(1, None);
        let mut done = create_test_transfer(1, file.id, "dest");
        done.status = StatusCode::Done;
        let mut deleted = create_test_transfer(2, file.id, "dest");
        deleted.deleted = true;
        let waiting = {
            let mut t = create_test_transfer(3, file.id, "dest");
            t.status = StatusCode::Wait;
            t
        };
        store
            .write_admission(&file, &[done, deleted, waiting])
            .unwrap();
        assert_eq!(store.count_pending_transfers("dest").unwrap(), 1);
    }

    #[test]
    fn transfer_index_updated_on_key_change() {
        let (store, _dir) = create_test_store();
        let file = create_test_file(1, None);
        let mut transfer = create_test_transfer(1, file.id, "dest");
        let old_key = transfer.unique_key.clone();
        store.write_admission(&file, &[transfer.clone()]).unwrap();

        transfer.unique_key = UniqueKey::new(true, "dest", "file.grib", None);
        store.put_transfer(&transfer).unwrap();

        assert!(store.list_transfers_by_key(&old_key).unwrap().is_empty());
        assert_eq!(
            store.list_transfers_by_key(&transfer.unique_key).unwrap().len(),
            1
        );
    }

    #[test]
    fn remove_data_file_drops_transfers_and_keeps_history() {
        let (store, _dir) = create_test_store();
        let file = create_test_file(1, Some("g1"));
        let transfer = create_test_transfer(1, file.id, "dest");
        store.write_admission(&file, &[transfer.clone()]).unwrap();
        store.put_metadata_value(file.id, "stream", "enfo").unwrap();
        store
            .append_transfer_history(&TransferHistory {
                transfer_id: transfer.id,
                destination: "dest".to_string(),
                status: StatusCode::Init,
                at: Utc::now(),
                comment: "created".to_string(),
                error: false,
            })
            .unwrap();

        assert_eq!(store.remove_data_file(file.id).unwrap(), 1);
        assert!(store.get_data_file(file.id).unwrap().is_none());
        assert!(store.get_transfer(transfer.id).unwrap().is_none());
        assert!(store.list_transfers_by_key(&transfer.unique_key).unwrap().is_empty());
        assert!(store.list_data_files_by_group("g1").unwrap().is_empty());
        assert!(store.list_metadata_values(file.id).unwrap().is_empty());
        assert_eq!(store.list_transfer_history(transfer.id).unwrap().len(), 1);

        assert!(matches!(
            store.remove_data_file(file.id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn group_index_follows_group_changes() {
        let (store, _dir) = create_test_store();
        let mut file = create_test_file(1, Some("g1"));
        store.put_data_file(&file).unwrap();
        assert_eq!(store.list_data_files_by_group("g1").unwrap().len(), 1);
        assert!(store.list_data_files_by_group("g").unwrap().is_empty());

        file.group_by = Some("g2".to_string());
        store.put_data_file(&file).unwrap();
        assert!(store.list_data_files_by_group("g1").unwrap().is_empty());
        assert_eq!(store.list_data_files_by_group("g2").unwrap().len(), 1);
    }

    #[test]
    fn history_is_append_only_and_ordered() {
        let (store, _dir) = create_test_store();
        let id = TransferId::new(5);
        for (status, comment) in [(StatusCode::Init, "a"), (StatusCode::Wait, "b")] {
            store
                .append_transfer_history(&TransferHistory {
                    transfer_id: id,
                    destination: "dest".to_string(),
                    status,
                    at: Utc::now(),
                    comment: comment.to_string(),
                    error: false,
                })
                .unwrap();
        }
        let history = store.list_transfer_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].comment, "a");
        assert_eq!(history[1].status, StatusCode::Wait);
        assert!(store
            .list_transfer_history(TransferId::new(6))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn product_status_lookup_and_filter() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        let product = ProductStatus {
            id: ecgate_core::ProductId::new(1),
            stream: "enfo".to_string(),
            time: "00".to_string(),
            step: 24,
            product_type: None,
            status: ProductState::Init,
            time_base: now,
            schedule_time: now,
            last_update: now,
            buffer_ms: None,
            user: None,
            comment: None,
        };
        store.put_product_status(&product).unwrap();
        let mut other = product.clone();
        other.time = "12".to_string();
        store.put_product_status(&other).unwrap();

        assert_eq!(
            store.get_product_status("enfo", "00", 24, None).unwrap(),
            Some(product)
        );
        assert!(store
            .get_product_status("enfo", "00", 24, Some("fc"))
            .unwrap()
            .is_none());
        assert_eq!(store.list_product_statuses(None).unwrap().len(), 2);
        assert_eq!(
            store
                .list_product_statuses(Some(("enfo", "12")))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn metadata_values_upsert() {
        let (store, _dir) = create_test_store();
        let id = DataFileId::new(3);
        assert!(!store.has_metadata_attribute("stream").unwrap());
        store.put_metadata_attribute("stream").unwrap();
        assert!(store.has_metadata_attribute("stream").unwrap());

        store.put_metadata_value(id, "stream", "enfo").unwrap();
        store.put_metadata_value(id, "stream", "oper").unwrap();
        store.put_metadata_value(id, "target", "None").unwrap();
        assert_eq!(
            store.list_metadata_values(id).unwrap(),
            vec![
                ("stream".to_string(), "oper".to_string()),
                ("target".to_string(), "None".to_string())
            ]
        );
    }
}
