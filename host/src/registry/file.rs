//! Preallocated backing file for the registry: slot 0 is the version
//! specifier, slots `1..max_entries` each hold one 256-byte entry (spec
//! §4.3 "File layout").

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::REGISTRY_ENTRY_SIZE;
use crate::error::HostError;

pub const VERSION_SPECIFIER: &[u8] = b"host-registry-v1";

pub struct RegistryFile {
    path: PathBuf,
    file: File,
    max_entries: u64,
}

impl RegistryFile {
    /// Open (creating and preallocating if absent) the backing file for
    /// `max_entries` slots, verifying the version specifier in slot 0.
    /// A mismatched version specifier is fatal.
    pub fn open(path: impl AsRef<Path>, max_entries: u64) -> Result<Self, HostError> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;

        let total_size = max_entries * REGISTRY_ENTRY_SIZE as u64;
        let current_len = file
            .metadata()
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?
            .len();
        if current_len < total_size {
            file.set_len(total_size)
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        }

        if !existed || current_len == 0 {
            let mut slot0 = vec![0u8; REGISTRY_ENTRY_SIZE];
            slot0[..VERSION_SPECIFIER.len()].copy_from_slice(VERSION_SPECIFIER);
            file.seek(SeekFrom::Start(0))
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
            file.write_all(&slot0)
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
            file.sync_all()
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        } else {
            let mut slot0 = vec![0u8; REGISTRY_ENTRY_SIZE];
            file.seek(SeekFrom::Start(0))
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
            file.read_exact(&mut slot0)
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
            if !slot0.starts_with(VERSION_SPECIFIER) {
                return Err(HostError::Corruption(
                    "registry file version specifier mismatch".to_string(),
                ));
            }
        }

        Ok(Self {
            path,
            file,
            max_entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    fn slot_offset(&self, index: u64) -> u64 {
        index * REGISTRY_ENTRY_SIZE as u64
    }

    /// Read raw slot bytes at `index` (0 is the version slot).
    pub fn read_slot(&mut self, index: u64) -> Result<Vec<u8>, HostError> {
        if index >= self.max_entries {
            return Err(HostError::InvalidPrecondition(format!(
                "slot index {index} out of range (max_entries={})",
                self.max_entries
            )));
        }
        let mut buf = vec![0u8; REGISTRY_ENTRY_SIZE];
        self.file
            .seek(SeekFrom::Start(self.slot_offset(index)))
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        Ok(buf)
    }

    /// Write exactly `REGISTRY_ENTRY_SIZE` bytes at `index`, optionally
    /// fsync'ing.
    pub fn write_slot(&mut self, index: u64, bytes: &[u8], fsync: bool) -> Result<(), HostError> {
        if index >= self.max_entries {
            return Err(HostError::InvalidPrecondition(format!(
                "slot index {index} out of range (max_entries={})",
                self.max_entries
            )));
        }
        debug_assert_eq!(bytes.len(), REGISTRY_ENTRY_SIZE);
        self.file
            .seek(SeekFrom::Start(self.slot_offset(index)))
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        self.file
            .write_all(bytes)
            .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        if fsync {
            self.file
                .sync_data()
                .map_err(|e| HostError::External(crate::error::ExternalError::Io(e.to_string())))?;
        }
        Ok(())
    }

    pub fn zero_slot(&mut self, index: u64, fsync: bool) -> Result<(), HostError> {
        self.write_slot(index, &vec![0u8; REGISTRY_ENTRY_SIZE], fsync)
    }
}
