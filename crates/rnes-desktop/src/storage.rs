//! Settings and battery saves on disk
//!
//! Layout under the data directory:
//! `config.json` for settings, `<kind>/<cartridge id>.sav` for RAM blobs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rnes_core::{Config, RamKind, Storage, StorageError};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    fn ram_dir(&self, kind: RamKind) -> PathBuf {
        self.root.join(kind.to_string())
    }

    fn ram_path(&self, kind: RamKind, key: &str) -> PathBuf {
        self.ram_dir(kind).join(format!("{key}.sav"))
    }
}

/// Read a whole file, `None` when it does not exist
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn ignore_missing(result: io::Result<()>) -> Result<(), StorageError> {
    match result {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
        _ => Ok(()),
    }
}

impl Storage for FileStorage {
    fn read_configuration(&self) -> Result<Option<Config>, StorageError> {
        match read_optional(&self.config_path())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_configuration(&mut self, config: &Config) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.config_path(), serde_json::to_vec_pretty(config)?)?;
        debug!(path = %self.config_path().display(), "configuration saved");
        Ok(())
    }

    fn delete_configuration(&mut self) -> Result<(), StorageError> {
        ignore_missing(fs::remove_file(self.config_path()))
    }

    fn read_ram(&self, kind: RamKind, key: &str, buffer: &mut [u8]) -> Result<bool, StorageError> {
        let path = self.ram_path(kind, key);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(false);
        };
        let len = bytes.len().min(buffer.len());
        buffer[..len].copy_from_slice(&bytes[..len]);
        info!(path = %path.display(), "loaded {kind} RAM");
        Ok(true)
    }

    fn write_ram(&mut self, kind: RamKind, key: &str, data: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(self.ram_dir(kind))?;
        let path = self.ram_path(kind, key);
        fs::write(&path, data)?;
        info!(path = %path.display(), bytes = data.len(), "saved {kind} RAM");
        Ok(())
    }

    fn delete_ram(&mut self, kind: RamKind, key: &str) -> Result<(), StorageError> {
        ignore_missing(fs::remove_file(self.ram_path(kind, key)))
    }

    fn delete_all_ram(&mut self, kind: RamKind) -> Result<(), StorageError> {
        ignore_missing(fs::remove_dir_all(self.ram_dir(kind)))
    }
}
