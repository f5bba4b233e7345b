//! Persistent storage collaborator
//!
//! The core never touches disk. Hosts implement [`Storage`] and the console
//! calls it to hydrate and flush battery-backed cartridge RAM; configuration
//! is persisted through the same interface by the host itself.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of a stored RAM blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RamKind {
    /// Battery-backed cartridge work RAM
    Battery,
}

impl fmt::Display for RamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RamKind::Battery => write!(f, "battery"),
        }
    }
}

/// Key/value store for settings and RAM blobs
pub trait Storage {
    /// Stored settings, `None` if nothing was saved
    fn read_configuration(&self) -> Result<Option<Config>, StorageError>;

    fn write_configuration(&mut self, config: &Config) -> Result<(), StorageError>;

    fn delete_configuration(&mut self) -> Result<(), StorageError>;

    /// Copy a stored blob into `buffer`; returns false when absent
    fn read_ram(&self, kind: RamKind, key: &str, buffer: &mut [u8]) -> Result<bool, StorageError>;

    fn write_ram(&mut self, kind: RamKind, key: &str, data: &[u8]) -> Result<(), StorageError>;

    fn delete_ram(&mut self, kind: RamKind, key: &str) -> Result<(), StorageError>;

    /// Remove every blob of `kind`
    fn delete_all_ram(&mut self, kind: RamKind) -> Result<(), StorageError>;
}

/// In-memory storage, used by tests and headless hosts
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    configuration: Option<String>,
    ram: HashMap<(RamKind, String), Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored RAM blobs
    pub fn ram_entries(&self) -> usize {
        self.ram.len()
    }
}

impl Storage for MemoryStorage {
    fn read_configuration(&self) -> Result<Option<Config>, StorageError> {
        self.configuration
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(StorageError::from)
    }

    fn write_configuration(&mut self, config: &Config) -> Result<(), StorageError> {
        self.configuration = Some(serde_json::to_string(config)?);
        Ok(())
    }

    fn delete_configuration(&mut self) -> Result<(), StorageError> {
        self.configuration = None;
        Ok(())
    }

    fn read_ram(&self, kind: RamKind, key: &str, buffer: &mut [u8]) -> Result<bool, StorageError> {
        match self.ram.get(&(kind, key.to_string())) {
            Some(data) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write_ram(&mut self, kind: RamKind, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.ram.insert((kind, key.to_string()), data.to_vec());
        Ok(())
    }

    fn delete_ram(&mut self, kind: RamKind, key: &str) -> Result<(), StorageError> {
        self.ram.remove(&(kind, key.to_string()));
        Ok(())
    }

    fn delete_all_ram(&mut self, kind: RamKind) -> Result<(), StorageError> {
        self.ram.retain(|(stored, _), _| *stored != kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSetting;

    #[test]
    fn test_configuration_round_trip() {
        let mut storage = MemoryStorage::new();
        assert!(storage.read_configuration().unwrap().is_none());
        let mut config = Config::default();
        config.region = RegionSetting::Pal;
        config.audio.volume = 0.25;
        storage.write_configuration(&config).unwrap();
        assert_eq!(storage.read_configuration().unwrap(), Some(config));
        storage.delete_configuration().unwrap();
        assert!(storage.read_configuration().unwrap().is_none());
    }

    #[test]
    fn test_deleted_ram_reads_absent() {
        let mut storage = MemoryStorage::new();
        storage.write_ram(RamKind::Battery, "abcd", &[1, 2, 3]).unwrap();
        let mut buffer = [0u8; 4];
        assert!(storage.read_ram(RamKind::Battery, "abcd", &mut buffer).unwrap());
        assert_eq!(buffer, [1, 2, 3, 0]);
        storage.delete_ram(RamKind::Battery, "abcd").unwrap();
        let mut buffer = [0u8; 4];
        assert!(!storage.read_ram(RamKind::Battery, "abcd", &mut buffer).unwrap());
        assert_eq!(buffer, [0; 4]);
    }

    #[test]
    fn test_delete_all_ram() {
        let mut storage = MemoryStorage::new();
        storage.write_ram(RamKind::Battery, "one", &[1]).unwrap();
        storage.write_ram(RamKind::Battery, "two", &[2]).unwrap();
        storage.delete_all_ram(RamKind::Battery).unwrap();
        assert_eq!(storage.ram_entries(), 0);
    }
}
