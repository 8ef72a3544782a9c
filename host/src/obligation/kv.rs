//! Storage obligation KV store (spec §6): "a single bucket keyed by
//! contract id; values are the canonical serialization of the
//! StorageObligation structure." Backed by one file per contract id
//! under a dedicated directory rather than a single monolithic file,
//! so a corrupt record never threatens its siblings (spec §7 kind 4:
//! "the offending record is skipped").

use std::path::{Path, PathBuf};

use log::error;

use host_common::crypto::Hash;

use crate::error::{ExternalError, HostError};
use crate::obligation::types::StorageObligation;

pub struct ObligationKv {
    dir: PathBuf,
}

impl ObligationKv {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, HostError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &Hash) -> PathBuf {
        self.dir.join(format!("{}.bin", id.to_hex()))
    }

    pub fn put(&self, obligation: &StorageObligation) -> Result<(), HostError> {
        let bytes = bincode::serialize(obligation).map_err(|e| HostError::Corruption(e.to_string()))?;
        let path = self.path_for(&obligation.id);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        std::fs::rename(&tmp, &path).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))
    }

    pub fn get(&self, id: &Hash) -> Result<Option<StorageObligation>, HostError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        match bincode::deserialize::<StorageObligation>(&bytes) {
            Ok(so) => Ok(Some(so)),
            Err(e) => {
                error!("obligation {id} is corrupted on disk and will be skipped: {e}");
                Ok(None)
            }
        }
    }

    pub fn remove(&self, id: &Hash) -> Result<(), HostError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HostError::External(ExternalError::Io(e.to_string()))),
        }
    }

    /// Iterate every obligation currently in the store, skipping and
    /// logging any that fail to decode (spec §7 kind 4).
    pub fn iter_all(&self) -> Result<Vec<StorageObligation>, HostError> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        for entry in entries {
            let entry = entry.map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    error!("failed to read obligation file {path:?}: {e}");
                    continue;
                }
            };
            match bincode::deserialize::<StorageObligation>(&bytes) {
                Ok(so) => out.push(so),
                Err(e) => error!("obligation file {path:?} is corrupted and will be skipped: {e}"),
            }
        }
        Ok(out)
    }
}
