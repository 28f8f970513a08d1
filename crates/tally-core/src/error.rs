//! Error types for the control core

use thiserror_no_std::Error;

use crate::persistence::RecordKey;

/// Failures reading or writing a persisted record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("record {0:?} has never been written")]
    Missing(RecordKey),
    #[error("record {key:?} header mismatch: magic {magic:#010x}, version {version}")]
    BadHeader {
        key: RecordKey,
        magic: u32,
        version: u16,
    },
    #[error("record {0:?} could not be encoded")]
    Encode(RecordKey),
    #[error("record {0:?} could not be decoded")]
    Decode(RecordKey),
    #[error("record {key:?} failed range validation: {field}")]
    OutOfRange {
        key: RecordKey,
        field: &'static str,
    },
    #[error("storage backend failed on record {key:?}: {details}")]
    Backend {
        key: RecordKey,
        details: &'static str,
    },
}

/// A configuration value outside its accepted range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("{field} = {value} is not a known code")]
    UnknownCode { field: &'static str, value: u32 },
    #[error("{field} rejected: sensor type {sensor_type} cannot count occupancy")]
    NoOccupancySupport { field: &'static str, sensor_type: u8 },
}
