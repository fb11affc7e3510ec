//! `RocksDB` storage layer for ecgate.
//!
//! This crate is the Repository of the gateway: durable storage for destinations,
//! movers, data files, transfers, their append-only histories and product statuses,
//! using `RocksDB` with column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `destinations`, `movers`: configuration records keyed by name
//! - `data_files`: primary data file records, keyed by `data_file_id`
//! - `data_files_by_group`: index for waiting on a pull group
//! - `transfers`: primary transfer records, keyed by `transfer_id`
//! - `transfers_by_key`, `transfers_by_data_file`, `transfers_by_destination`: indexes
//! - `transfer_history`, `incoming_history`: append-only histories
//! - `product_status`: monitoring records keyed by stream, time, step and type
//! - `metadata_attributes`, `metadata_values`: free-form file metadata
//! - `sequences`: identifier allocation
//!
//! # Example
//!
//! ```no_run
//! use ecgate_store::{Destination, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/ecgate-db").unwrap();
//! store.put_destination(&Destination::new("ecmwf-test")).unwrap();
//! let pending = store.count_pending_transfers("ecmwf-test").unwrap();
//! assert_eq!(pending, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    AliasRule, DataFile, DataTransfer, Destination, DestinationPolicy, DestinationState,
    ForceRule, IncomingHistory, Mover, ProductState, ProductStatus, StatusCode, TransferHistory,
};

use ecgate_core::{DataFileId, TransferId, UniqueKey};

/// Identifier sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Data file identifiers.
    DataFile,
    /// Transfer identifiers.
    Transfer,
    /// Product status identifiers.
    Product,
    /// History record ordering.
    History,
}

impl Sequence {
    /// Key of the sequence in the `sequences` column family.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DataFile => "data_file",
            Self::Transfer => "transfer",
            Self::Product => "product",
            Self::History => "history",
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer; calls are synchronous and each one is
/// atomic on its own.
pub trait Store: Send + Sync {
    // =========================================================================
    // Sequences
    // =========================================================================

    /// Allocate the next identifier of a sequence, starting at 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_id(&self, sequence: Sequence) -> Result<u64>;

    // =========================================================================
    // Destination and Mover Operations
    // =========================================================================

    /// Insert or update a destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_destination(&self, destination: &Destination) -> Result<()>;

    /// Get a destination by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_destination(&self, name: &str) -> Result<Option<Destination>>;

    /// List all destinations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_destinations(&self) -> Result<Vec<Destination>>;

    /// Insert or update a mover.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_mover(&self, mover: &Mover) -> Result<()>;

    /// List all movers in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_movers(&self) -> Result<Vec<Mover>>;

    // =========================================================================
    // Data File Operations
    // =========================================================================

    /// Insert or update a data file, maintaining the group index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_data_file(&self, data_file: &DataFile) -> Result<()>;

    /// Get a data file by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_data_file(&self, id: DataFileId) -> Result<Option<DataFile>>;

    /// List the data files of a pull group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_data_files_by_group(&self, group: &str) -> Result<Vec<DataFile>>;

    /// Remove a data file with all its transfers and metadata values.
    ///
    /// Histories are append-only and kept. Returns the number of transfers removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the data file doesn't exist.
    fn remove_data_file(&self, id: DataFileId) -> Result<usize>;

    // =========================================================================
    // Transfer Operations
    // =========================================================================

    /// Insert or update a transfer, maintaining the key, data file and destination indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_transfer(&self, transfer: &DataTransfer) -> Result<()>;

    /// Get a transfer by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transfer(&self, id: TransferId) -> Result<Option<DataTransfer>>;

    /// List every transfer carrying a unique key, deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transfers_by_key(&self, key: &UniqueKey) -> Result<Vec<DataTransfer>>;

    /// List the transfers of a data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transfers_by_data_file(&self, id: DataFileId) -> Result<Vec<DataTransfer>>;

    /// List the transfers of a destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transfers_by_destination(&self, destination: &str) -> Result<Vec<DataTransfer>>;

    /// Count the non-deleted transfers of a destination that are not finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_pending_transfers(&self, destination: &str) -> Result<u64>;

    /// Write a data file and its transfers in one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written then.
    fn write_admission(&self, data_file: &DataFile, transfers: &[DataTransfer]) -> Result<()>;

    // =========================================================================
    // History Operations
    // =========================================================================

    /// Append a transfer history record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_transfer_history(&self, history: &TransferHistory) -> Result<()>;

    /// List the history of a transfer in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transfer_history(&self, id: TransferId) -> Result<Vec<TransferHistory>>;

    /// Append an upload accounting record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_incoming_history(&self, history: &IncomingHistory) -> Result<()>;

    /// List the upload records of a transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_incoming_history(&self, id: TransferId) -> Result<Vec<IncomingHistory>>;

    // =========================================================================
    // Product Status Operations
    // =========================================================================

    /// Get a product status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_product_status(
        &self,
        stream: &str,
        time: &str,
        step: i64,
        product_type: Option<&str>,
    ) -> Result<Option<ProductStatus>>;

    /// Insert or replace a product status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_product_status(&self, product: &ProductStatus) -> Result<()>;

    /// List product statuses, optionally restricted to one stream and time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_product_statuses(&self, filter: Option<(&str, &str)>) -> Result<Vec<ProductStatus>>;

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    /// Whether a metadata attribute name is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_metadata_attribute(&self, name: &str) -> Result<bool>;

    /// Register a metadata attribute name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_metadata_attribute(&self, name: &str) -> Result<()>;

    /// Insert or update a metadata value of a data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_metadata_value(&self, id: DataFileId, name: &str, value: &str) -> Result<()>;

    /// List the metadata values of a data file, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_metadata_values(&self, id: DataFileId) -> Result<Vec<(String, String)>>;
}
