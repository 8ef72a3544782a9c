//! Preallocated backing file for ephemeral account records: a 256-byte
//! header, then records of `ACCOUNT_RECORD_SIZE` bytes starting at slot
//! 1 (slot 0 is metadata padding).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::accounts::record::AccountRecord;
use crate::config::{ACCOUNTS_HEADER_SIZE, ACCOUNT_RECORD_SIZE};
use crate::error::{ExternalError, HostError};

pub const VERSION_SPECIFIER: &[u8] = b"host-accounts-v1";

fn io_err(e: std::io::Error) -> HostError {
    HostError::External(ExternalError::Io(e.to_string()))
}

pub struct AccountsFile {
    path: PathBuf,
    file: File,
}

impl AccountsFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(io_err)?;

        let len = file.metadata().map_err(io_err)?.len();
        if !existed || len < ACCOUNTS_HEADER_SIZE as u64 {
            let mut header = vec![0u8; ACCOUNTS_HEADER_SIZE];
            header[..VERSION_SPECIFIER.len()].copy_from_slice(VERSION_SPECIFIER);
            file.seek(SeekFrom::Start(0)).map_err(io_err)?;
            file.write_all(&header).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        } else {
            let mut header = vec![0u8; ACCOUNTS_HEADER_SIZE];
            file.seek(SeekFrom::Start(0)).map_err(io_err)?;
            file.read_exact(&mut header).map_err(io_err)?;
            if !header.starts_with(VERSION_SPECIFIER) {
                return Err(HostError::Corruption(
                    "accounts file version specifier mismatch".to_string(),
                ));
            }
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_offset(index: u32) -> u64 {
        ACCOUNTS_HEADER_SIZE as u64 + (index as u64) * ACCOUNT_RECORD_SIZE as u64
    }

    /// Number of record slots currently allocated in the file (slot 0
    /// excluded: it's metadata padding, never a record).
    pub fn slot_count(&mut self) -> Result<u32, HostError> {
        let len = self.file.metadata().map_err(io_err)?.len();
        if len <= ACCOUNTS_HEADER_SIZE as u64 {
            return Ok(0);
        }
        Ok(((len - ACCOUNTS_HEADER_SIZE as u64) / ACCOUNT_RECORD_SIZE as u64) as u32)
    }

    pub fn read_record(&mut self, index: u32) -> Result<AccountRecord, HostError> {
        let mut buf = vec![0u8; ACCOUNT_RECORD_SIZE];
        self.file
            .seek(SeekFrom::Start(Self::slot_offset(index)))
            .map_err(io_err)?;
        self.file.read_exact(&mut buf).map_err(io_err)?;
        AccountRecord::decode(&buf).map_err(|e| HostError::Corruption(e.to_string()))
    }

    pub fn write_record(&mut self, index: u32, record: &AccountRecord) -> Result<(), HostError> {
        let bytes = record.encode();
        self.file
            .seek(SeekFrom::Start(Self::slot_offset(index)))
            .map_err(io_err)?;
        self.file.write_all(&bytes).map_err(io_err)?;
        self.file.sync_data().map_err(io_err)
    }

    /// Extend the file by one fresh (free) slot, returning its index.
    pub fn append_slot(&mut self) -> Result<u32, HostError> {
        let index = self.slot_count()?;
        // index 0 is reserved; first real record lives at index 1.
        let index = index.max(1);
        self.write_record(index, &AccountRecord::free())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host_common::crypto::Hash;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = AccountsFile::open(dir.path().join("accounts.dat")).unwrap();
        let index = f.append_slot().unwrap();
        assert_eq!(index, 1);
        let record = AccountRecord {
            account_id: Hash::new([1; 32]),
            balance: 500,
            last_txn_time: 10,
        };
        f.write_record(index, &record).unwrap();
        assert_eq!(f.read_record(index).unwrap(), record);
    }

    #[test]
    fn reopen_checks_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.dat");
        {
            AccountsFile::open(&path).unwrap();
        }
        assert!(AccountsFile::open(&path).is_ok());
    }
}
