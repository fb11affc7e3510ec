//! Core identifier types for ecgate.
//!
//! Records persisted by the repository carry numeric identifiers allocated from
//! per-kind sequences. Sessions are identified by random UUIDs. The [`UniqueKey`]
//! is the deduplication key of an admitted file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an identifier from its numeric value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the numeric value.
            #[must_use]
            pub const fn as_u64(&self) -> u64 {
                self.0
            }

            /// Big-endian bytes, so that keys sort in allocation order.
            #[must_use]
            pub const fn to_be_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode an identifier from the first eight bytes of a key.
            ///
            /// # Errors
            ///
            /// Returns an error if fewer than eight bytes are available.
            pub fn from_be_slice(bytes: &[u8]) -> Result<Self, IdError> {
                let arr: [u8; 8] = bytes
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(IdError::InvalidLength {
                        expected: 8,
                        got: bytes.len(),
                    })?;
                Ok(Self(u64::from_be_bytes(arr)))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidNumber(s.to_string()))
            }
        }
    };
}

numeric_id!(
    /// Identifier of a DataFile (one physical payload).
    DataFileId
);

numeric_id!(
    /// Identifier of a DataTransfer (one delivery of a DataFile to one destination).
    TransferId
);

numeric_id!(
    /// Identifier of a ProductStatus row.
    ProductId
);

/// A 16-byte session identifier based on UUID v4.
///
/// One is generated per client connection and used as the owner of any
/// uniqueness lock the session takes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new `SessionId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    /// Parse a `SessionId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

/// Deduplication and mutual-exclusion key of an admitted file.
///
/// Derived deterministically from the standby flag, the destination name,
/// the target filename and the optional unique name. The textual form is
/// what clients see in rejection messages; the blake3 digest is what the
/// repository indexes on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueKey(String);

impl UniqueKey {
    /// Build the key for a request.
    #[must_use]
    pub fn new(standby: bool, destination: &str, target: &str, unique_name: Option<&str>) -> Self {
        let mut key = String::with_capacity(1 + destination.len() + target.len());
        key.push(if standby { '1' } else { '0' });
        key.push_str(destination);
        key.push_str(target);
        if let Some(name) = unique_name {
            key.push_str(name);
        }
        Self(key)
    }

    /// The textual key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A fixed-size digest of the key, suitable for index prefixes.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(self.0.as_bytes()).as_bytes()
    }

    /// Hex form of [`digest`](Self::digest), used in logs.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

impl fmt::Debug for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueKey({})", self.0)
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid unsigned number.
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_key_layout() {
        let key = UniqueKey::new(true, "dest", "a/b.grib", Some("v2"));
        assert_eq!(key.as_str(), "1desta/b.gribv2");

        let key = UniqueKey::new(false, "dest", "a/b.grib", None);
        assert_eq!(key.as_str(), "0desta/b.grib");
    }

    #[test]
    fn unique_key_digest_is_deterministic() {
        let a = UniqueKey::new(false, "dest", "file", None);
        let b = UniqueKey::new(false, "dest", "file", None);
        let c = UniqueKey::new(true, "dest", "file", None);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest_hex().len(), 64);
    }

    #[test]
    fn numeric_id_key_bytes() {
        let id = DataFileId::new(258);
        let bytes = id.to_be_bytes();
        assert_eq!(DataFileId::from_be_slice(&bytes).unwrap(), id);
        assert!(DataFileId::from_be_slice(&bytes[..4]).is_err());
        assert!(DataFileId::new(1).to_be_bytes() < DataFileId::new(2).to_be_bytes());
    }

    #[test]
    fn numeric_id_parse() {
        assert_eq!("42".parse::<TransferId>().unwrap(), TransferId::new(42));
        assert!(matches!(
            "x".parse::<TransferId>(),
            Err(IdError::InvalidNumber(_))
        ));
    }

    #[test]
    fn session_id_serde() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
