//! Core types and utilities for ecgate.
//!
//! This crate provides the foundational types used throughout the gateway:
//!
//! - **Identifiers**: numeric record ids, session ids and the [`UniqueKey`]
//! - **Time**: duration strings and `yyyyMMddHHmmss` style date patterns
//! - **Error types**: common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use ecgate_core::{parse_duration, DatePattern, UniqueKey};
//!
//! let key = UniqueKey::new(false, "dest", "a/b.grib", None);
//! assert_eq!(key.as_str(), "0desta/b.grib");
//!
//! let lifetime = parse_duration("2d").unwrap();
//! assert_eq!(lifetime.num_hours(), 48);
//!
//! let at = DatePattern::new("yyyyMMddHHmmss").unwrap();
//! assert!(at.parse("20240101120000").is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod time;

pub use error::{CoreError, Result};
pub use ids::{DataFileId, IdError, ProductId, SessionId, TransferId, UniqueKey};
pub use time::{display_date, parse_duration, start_of_day, DatePattern};
