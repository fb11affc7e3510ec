//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Destination records, keyed by name.
    pub const DESTINATIONS: &str = "destinations";

    /// Mover records, keyed by name.
    pub const MOVERS: &str = "movers";

    /// Primary data file records, keyed by `data_file_id`.
    pub const DATA_FILES: &str = "data_files";

    /// Index: data files by pull group, keyed by `group || 0x00 || data_file_id`.
    pub const DATA_FILES_BY_GROUP: &str = "data_files_by_group";

    /// Primary transfer records, keyed by `transfer_id`.
    pub const TRANSFERS: &str = "transfers";

    /// Index: transfers by unique key, keyed by `blake3(key) || transfer_id`.
    pub const TRANSFERS_BY_KEY: &str = "transfers_by_key";

    /// Index: transfers by data file, keyed by `data_file_id || transfer_id`.
    pub const TRANSFERS_BY_DATA_FILE: &str = "transfers_by_data_file";

    /// Index: transfers by destination, keyed by `name || 0x00 || transfer_id`.
    pub const TRANSFERS_BY_DESTINATION: &str = "transfers_by_destination";

    /// Append-only transfer history, keyed by `transfer_id || sequence`.
    pub const TRANSFER_HISTORY: &str = "transfer_history";

    /// Append-only upload accounting, keyed by `transfer_id || sequence`.
    pub const INCOMING_HISTORY: &str = "incoming_history";

    /// Product statuses, keyed by `stream || 0x00 || time || 0x00 || step || 0x00 || type`.
    pub const PRODUCT_STATUS: &str = "product_status";

    /// Known metadata attribute names.
    pub const METADATA_ATTRIBUTES: &str = "metadata_attributes";

    /// Metadata values, keyed by `data_file_id || name`.
    pub const METADATA_VALUES: &str = "metadata_values";

    /// Identifier sequences, keyed by sequence name.
    pub const SEQUENCES: &str = "sequences";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::DESTINATIONS,
        cf::MOVERS,
        cf::DATA_FILES,
        cf::DATA_FILES_BY_GROUP,
        cf::TRANSFERS,
        cf::TRANSFERS_BY_KEY,
        cf::TRANSFERS_BY_DATA_FILE,
        cf::TRANSFERS_BY_DESTINATION,
        cf::TRANSFER_HISTORY,
        cf::INCOMING_HISTORY,
        cf::PRODUCT_STATUS,
        cf::METADATA_ATTRIBUTES,
        cf::METADATA_VALUES,
        cf::SEQUENCES,
    ]
}
