//! Persisted records
//!
//! Each record is stored as a small header (magic + version) followed by the
//! postcard-encoded body. A record that fails header, decode or range
//! validation is reset to factory defaults and written back.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::config::DeviceConfig;
use crate::error::StorageError;
use crate::status::RuntimeStatus;

/// Largest encoded record, header included.
pub const RECORD_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Config,
    Status,
}

/// Byte storage for records, e.g. EEPROM or a flash page per key.
pub trait RecordStore {
    /// Copy the stored bytes for `key` into `buf`, returning the length.
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, key: RecordKey, data: &[u8]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RecordHeader {
    magic: u32,
    version: u16,
}

/// A type stored as one record.
pub trait Record: Serialize + DeserializeOwned + Default + Clone + PartialEq {
    const KEY: RecordKey;
    const MAGIC: u32;
    const VERSION: u16;

    /// Repair out-of-range fields, returning the first one found.
    fn sanitize(&mut self) -> Option<&'static str>;
}

impl Record for DeviceConfig {
    const KEY: RecordKey = RecordKey::Config;
    const MAGIC: u32 = 0x5441_4C43; // "TALC"
    const VERSION: u16 = 1;

    fn sanitize(&mut self) -> Option<&'static str> {
        DeviceConfig::sanitize(self)
    }
}

impl Record for RuntimeStatus {
    const KEY: RecordKey = RecordKey::Status;
    const MAGIC: u32 = 0x5441_4C53; // "TALS"
    const VERSION: u16 = 1;

    fn sanitize(&mut self) -> Option<&'static str> {
        RuntimeStatus::sanitize(self)
    }
}

pub fn encode<T: Record>(value: &T, buf: &mut [u8]) -> Result<usize, StorageError> {
    let header = RecordHeader {
        magic: T::MAGIC,
        version: T::VERSION,
    };
    let header_len = postcard::to_slice(&header, buf)
        .map_err(|_| StorageError::Encode(T::KEY))?
        .len();
    let body_len = postcard::to_slice(value, &mut buf[header_len..])
        .map_err(|_| StorageError::Encode(T::KEY))?
        .len();
    Ok(header_len + body_len)
}

/// Decode and validate a record. Range violations are reported, not repaired.
pub fn decode<T: Record>(bytes: &[u8]) -> Result<T, StorageError> {
    let (header, body) = postcard::take_from_bytes::<RecordHeader>(bytes)
        .map_err(|_| StorageError::Decode(T::KEY))?;
    if header.magic != T::MAGIC || header.version != T::VERSION {
        return Err(StorageError::BadHeader {
            key: T::KEY,
            magic: header.magic,
            version: header.version,
        });
    }
    let mut value: T = postcard::from_bytes(body).map_err(|_| StorageError::Decode(T::KEY))?;
    match value.sanitize() {
        Some(field) => Err(StorageError::OutOfRange { key: T::KEY, field }),
        None => Ok(value),
    }
}

/// How a record came to be in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Factory defaults were installed because of the given failure
    Reset(StorageError),
}

/// A record held in memory alongside the last version written to storage.
#[derive(Debug, Clone)]
pub struct Persisted<T: Record> {
    value: T,
    saved: Option<T>,
}

impl<T: Record> Persisted<T> {
    pub fn load(store: &mut dyn RecordStore) -> (Self, LoadOutcome) {
        let mut buf = [0u8; RECORD_CAPACITY];
        let result = store
            .read(T::KEY, &mut buf)
            .and_then(|len| decode::<T>(&buf[..len.min(RECORD_CAPACITY)]));

        match result {
            Ok(value) => {
                debug!(" Loaded record {:?}", T::KEY);
                (
                    Self {
                        saved: Some(value.clone()),
                        value,
                    },
                    LoadOutcome::Loaded,
                )
            }
            Err(e) => {
                match e {
                    StorageError::Missing(_) => info!(" Record {:?} not found, using defaults", T::KEY),
                    _ => warn!(" Record {:?} invalid ({}), reset to defaults", T::KEY, e),
                }
                let mut record = Self {
                    value: T::default(),
                    saved: None,
                };
                if let Err(write_err) = record.flush(store) {
                    error!(" Failed to write default {:?}: {}", T::KEY, write_err);
                }
                (record, LoadOutcome::Reset(e))
            }
        }
    }

    pub fn new(value: T) -> Self {
        Self { value, saved: None }
    }

    pub fn is_dirty(&self) -> bool {
        self.saved.as_ref() != Some(&self.value)
    }

    /// Write the record if it changed since the last write.
    pub fn flush(&mut self, store: &mut dyn RecordStore) -> Result<bool, StorageError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(&self.value, &mut buf)?;
        store.write(T::KEY, &buf[..len])?;
        self.saved = Some(self.value.clone());
        Ok(true)
    }
}

impl<T: Record> core::ops::Deref for Persisted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Record> core::ops::DerefMut for Persisted<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertCode;
    use std::collections::HashMap;
    use std::vec::Vec;

    #[derive(Default)]
    struct MemStore {
        records: HashMap<RecordKey, Vec<u8>>,
        writes: usize,
    }

    impl RecordStore for MemStore {
        fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<usize, StorageError> {
            let data = self.records.get(&key).ok_or(StorageError::Missing(key))?;
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }

        fn write(&mut self, key: RecordKey, data: &[u8]) -> Result<(), StorageError> {
            self.writes += 1;
            self.records.insert(key, data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_first_boot_writes_defaults() {
        let mut store = MemStore::default();
        let (config, outcome) = Persisted::<DeviceConfig>::load(&mut store);
        assert_eq!(outcome, LoadOutcome::Reset(StorageError::Missing(RecordKey::Config)));
        assert_eq!(*config, DeviceConfig::default());
        assert_eq!(store.writes, 1);
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_changes_survive_reload() {
        let mut store = MemStore::default();
        let (mut status, _) = Persisted::<RuntimeStatus>::load(&mut store);
        status.record_count(5);
        status.raise_alert(AlertCode::ConnectTimeout, 5);
        assert!(status.is_dirty());
        assert_eq!(status.flush(&mut store), Ok(true));
        assert_eq!(status.flush(&mut store), Ok(false));

        let (reloaded, outcome) = Persisted::<RuntimeStatus>::load(&mut store);
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(reloaded.daily_count, 1);
        assert_eq!(reloaded.alert(), Some(AlertCode::ConnectTimeout));
    }

    #[test]
    fn test_corrupt_header_resets() {
        let mut store = MemStore::default();
        let (mut config, _) = Persisted::<DeviceConfig>::load(&mut store);
        config.set_reporting_interval_secs(900).ok();
        config.flush(&mut store).ok();

        // Status magic in the config slot
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(&RuntimeStatus::default(), &mut buf).unwrap();
        store.records.insert(RecordKey::Config, buf[..len].to_vec());

        let (config, outcome) = Persisted::<DeviceConfig>::load(&mut store);
        assert!(matches!(outcome, LoadOutcome::Reset(StorageError::BadHeader { .. })));
        assert_eq!(config.reporting_interval_secs(), 3_600);
    }

    #[test]
    fn test_truncated_record_resets() {
        let mut store = MemStore::default();
        store.records.insert(RecordKey::Status, std::vec![0xFF]);
        let (_, outcome) = Persisted::<RuntimeStatus>::load(&mut store);
        assert_eq!(outcome, LoadOutcome::Reset(StorageError::Decode(RecordKey::Status)));
    }

    #[test]
    fn test_records_fit_capacity() {
        let mut buf = [0u8; RECORD_CAPACITY];
        let mut status = RuntimeStatus::default();
        status.hourly_count = u32::MAX;
        status.daily_count = u32::MAX;
        status.test_soc_override = Some(100);
        assert!(encode(&status, &mut buf).is_ok());
        assert!(encode(&DeviceConfig::default(), &mut buf).is_ok());
    }
}
