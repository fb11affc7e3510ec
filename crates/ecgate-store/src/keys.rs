//! Key encoding utilities for `RocksDB`.
//!
//! Numeric identifiers are encoded big-endian so that keys sort in allocation
//! order. String components are terminated by a `0x00` separator so that one
//! name is never the prefix of another's scan.

use ecgate_core::{DataFileId, IdError, TransferId, UniqueKey};

const SEPARATOR: u8 = 0;

fn terminated(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 9);
    key.extend_from_slice(name.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Encode a data file key.
#[must_use]
pub fn data_file_key(id: DataFileId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode a transfer key.
#[must_use]
pub fn transfer_key(id: TransferId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Prefix for all transfers sharing a unique key.
#[must_use]
pub fn unique_key_prefix(key: &UniqueKey) -> Vec<u8> {
    key.digest().to_vec()
}

/// Encode a unique-key index entry: `blake3(key) || transfer_id`.
#[must_use]
pub fn unique_key_transfer_key(key: &UniqueKey, id: TransferId) -> Vec<u8> {
    let mut out = unique_key_prefix(key);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Prefix for all transfers of a data file.
#[must_use]
pub fn data_file_prefix(id: DataFileId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode a data-file index entry: `data_file_id || transfer_id`.
#[must_use]
pub fn data_file_transfer_key(data_file: DataFileId, id: TransferId) -> Vec<u8> {
    let mut out = data_file_prefix(data_file);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Prefix for all transfers of a destination.
#[must_use]
pub fn destination_prefix(name: &str) -> Vec<u8> {
    terminated(name)
}

/// Encode a destination index entry: `name || 0x00 || transfer_id`.
#[must_use]
pub fn destination_transfer_key(name: &str, id: TransferId) -> Vec<u8> {
    let mut out = terminated(name);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Prefix for all data files of a pull group.
#[must_use]
pub fn group_prefix(group: &str) -> Vec<u8> {
    terminated(group)
}

/// Encode a group index entry: `group || 0x00 || data_file_id`.
#[must_use]
pub fn group_data_file_key(group: &str, id: DataFileId) -> Vec<u8> {
    let mut out = terminated(group);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Extract the trailing eight-byte identifier of an index key.
///
/// # Errors
///
/// Returns an error if the key is shorter than eight bytes.
pub fn trailing_id(key: &[u8]) -> Result<u64, IdError> {
    let start = key.len().checked_sub(8).ok_or(IdError::InvalidLength {
        expected: 8,
        got: key.len(),
    })?;
    Ok(TransferId::from_be_slice(&key[start..])?.as_u64())
}

/// Encode a history key: `transfer_id || sequence`.
#[must_use]
pub fn history_key(id: TransferId, sequence: u64) -> Vec<u8> {
    let mut out = transfer_key(id);
    out.extend_from_slice(&sequence.to_be_bytes());
    out
}

/// Encode a product status key.
#[must_use]
pub fn product_key(stream: &str, time: &str, step: i64, product_type: Option<&str>) -> Vec<u8> {
    let mut out = product_prefix(stream, time);
    out.extend_from_slice(step.to_string().as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(product_type.unwrap_or_default().as_bytes());
    out
}

/// Prefix for all products of a stream and time.
#[must_use]
pub fn product_prefix(stream: &str, time: &str) -> Vec<u8> {
    let mut out = terminated(stream);
    out.extend_from_slice(time.as_bytes());
    out.push(SEPARATOR);
    out
}

/// Encode a metadata value key: `data_file_id || name`.
#[must_use]
pub fn metadata_value_key(id: DataFileId, name: &str) -> Vec<u8> {
    let mut out = data_file_key(id);
    out.extend_from_slice(name.as_bytes());
    out
}
