mod entry;
mod file;

pub use entry::{EntryType, RegistryEntry};
pub use file::RegistryFile;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use host_common::crypto::Hash;
use log::error;
use metrics::gauge;

use crate::error::HostError;

struct Inner {
    file: RegistryFile,
    /// map_key -> slot index, reconstructed on load by scanning every
    /// slot and treating the `noKey` sentinel as free.
    occupied: HashMap<Hash, u64>,
    /// Free-list bitfield, indices `1..max_entries`. `true` = occupied.
    bitfield: Vec<bool>,
}

impl Inner {
    fn load(mut file: RegistryFile) -> Result<Self, HostError> {
        let max_entries = file.max_entries();
        let mut occupied = HashMap::new();
        let mut bitfield = vec![false; max_entries as usize];
        for index in 1..max_entries {
            let slot = match file.read_slot(index) {
                Ok(slot) => slot,
                Err(e) => {
                    error!("registry: failed to read slot {index} during load: {e}");
                    continue;
                }
            };
            match RegistryEntry::decode(&slot) {
                Ok(Some(e)) => {
                    occupied.insert(e.map_key(), index);
                    bitfield[index as usize] = true;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("registry: slot {index} is corrupted and will be skipped: {e}");
                }
            }
        }
        gauge!("host_registry_entries").set(occupied.len() as f64);
        Ok(Self {
            file,
            occupied,
            bitfield,
        })
    }

    /// Smallest free index wins, for determinism.
    fn claim_free_slot(&self) -> Option<u64> {
        self.bitfield
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, occupied)| !**occupied)
            .map(|(index, _)| index as u64)
    }
}

/// Outcome of [`Registry::update`]. `Updated`/`Inserted` mutate state;
/// the two conflict variants return the existing entry as evidence and
/// make no change.
pub enum UpdateOutcome {
    Inserted,
    Updated,
    LowerRevNum { existing: RegistryEntry },
    SameRevNum { existing: RegistryEntry },
}

/// Fixed-size, signed key/value store. The registry owns its backing
/// file exclusively; every mutating operation writes the full 256-byte
/// slot at its exact offset.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn open(path: impl AsRef<Path>, max_entries: u64) -> Result<Arc<Self>, HostError> {
        let file = RegistryFile::open(path, max_entries)?;
        let inner = Inner::load(file)?;
        Ok(Arc::new(Self {
            inner: Mutex::new(inner),
        }))
    }

    pub fn update(&self, entry: RegistryEntry, fsync: bool) -> Result<UpdateOutcome, HostError> {
        entry
            .verify_signature()
            .map_err(|e| HostError::Auth(crate::error::AuthError::Crypto(e)))?;
        if entry.data.len() > crate::config::REGISTRY_DATA_SIZE {
            return Err(HostError::InvalidPrecondition(format!(
                "registry entry data length {} exceeds {}",
                entry.data.len(),
                crate::config::REGISTRY_DATA_SIZE
            )));
        }

        let map_key = entry.map_key();
        let mut inner = self.inner.lock().expect("registry mutex poisoned");

        if let Some(&index) = inner.occupied.get(&map_key) {
            let existing_bytes = inner.file.read_slot(index)?;
            let existing = RegistryEntry::decode(&existing_bytes)
                .map_err(|e| HostError::Corruption(e.to_string()))?
                .ok_or_else(|| HostError::Corruption(format!("slot {index} marked occupied but holds noKey")))?;

            if entry.revision < existing.revision {
                return Ok(UpdateOutcome::LowerRevNum { existing });
            }
            if entry.revision == existing.revision {
                if entry.data == existing.data && entry.signature.as_bytes() == existing.signature.as_bytes() {
                    // Idempotent resubmission of the same entry: no conflict.
                    inner.file.write_slot(index, &entry.encode(), fsync)?;
                    return Ok(UpdateOutcome::Updated);
                }
                return Ok(UpdateOutcome::SameRevNum { existing });
            }

            inner.file.write_slot(index, &entry.encode(), fsync)?;
            Ok(UpdateOutcome::Updated)
        } else {
            let index = inner
                .claim_free_slot()
                .ok_or(HostError::RegistryFull)?;
            inner.file.write_slot(index, &entry.encode(), fsync)?;
            inner.bitfield[index as usize] = true;
            inner.occupied.insert(map_key, index);
            gauge!("host_registry_entries").set(inner.occupied.len() as f64);
            Ok(UpdateOutcome::Inserted)
        }
    }

    pub fn get(&self, public_key: &host_common::crypto::PublicKey, tweak: &Hash) -> Result<Option<RegistryEntry>, HostError> {
        let map_key = host_common::crypto::hash_all(&[
            &public_key.algorithm().tag().to_le_bytes(),
            public_key.as_bytes(),
            tweak.as_bytes(),
        ]);
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let Some(&index) = inner.occupied.get(&map_key) else {
            return Ok(None);
        };
        let bytes = inner.file.read_slot(index)?;
        RegistryEntry::decode(&bytes).map_err(|e| HostError::Corruption(e.to_string()))
    }

    /// Zero every entry whose `expiry <= cutoff` and clear its bit.
    pub fn prune(&self, expiry_cutoff: u32, fsync: bool) -> Result<usize, HostError> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let indices: Vec<u64> = inner.occupied.values().copied().collect();
        let mut pruned = 0;
        for index in indices {
            let bytes = inner.file.read_slot(index)?;
            let Some(entry) = RegistryEntry::decode(&bytes).map_err(|e| HostError::Corruption(e.to_string()))? else {
                continue;
            };
            if entry.expiry <= expiry_cutoff {
                inner.file.zero_slot(index, fsync)?;
                inner.bitfield[index as usize] = false;
                inner.occupied.remove(&entry.map_key());
                pruned += 1;
            }
        }
        gauge!("host_registry_entries").set(inner.occupied.len() as f64);
        Ok(pruned)
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        let occupied = inner.occupied.len() as u64;
        RegistryStats {
            occupied,
            free: inner.file.max_entries().saturating_sub(1).saturating_sub(occupied),
        }
    }
}

pub struct RegistryStats {
    pub occupied: u64,
    pub free: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use host_common::crypto::SigningKeyPair;
    use rand::rngs::OsRng;

    fn make_entry(keypair: &SigningKeyPair, tweak: Hash, revision: u64, data: &[u8]) -> RegistryEntry {
        let mut entry = RegistryEntry {
            public_key: keypair.public_key(),
            tweak,
            expiry: 100,
            data: data.to_vec(),
            revision,
            signature: host_common::crypto::Signature::from_bytes([0u8; 64]),
            entry_type: EntryType::Regular,
        };
        let msg = entry.signed_message();
        entry.signature = keypair.sign(&msg);
        entry
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("registry.dat"), 8).unwrap();
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let tweak = Hash::new([2; 32]);
        let entry = make_entry(&keypair, tweak, 1, b"A");

        matches!(registry.update(entry, true).unwrap(), UpdateOutcome::Inserted);
        let got = registry.get(&keypair.public_key(), &tweak).unwrap().unwrap();
        assert_eq!(got.data, b"A");
    }

    #[test]
    fn same_revision_conflicting_data_is_rejected_with_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("registry.dat"), 8).unwrap();
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let tweak = Hash::new([3; 32]);

        registry.update(make_entry(&keypair, tweak, 1, b"A"), true).unwrap();
        let outcome = registry.update(make_entry(&keypair, tweak, 1, b"B"), true).unwrap();
        match outcome {
            UpdateOutcome::SameRevNum { existing } => assert_eq!(existing.data, b"A"),
            _ => panic!("expected SameRevNum"),
        }

        let outcome = registry.update(make_entry(&keypair, tweak, 2, b"C"), true).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Updated));
        let got = registry.get(&keypair.public_key(), &tweak).unwrap().unwrap();
        assert_eq!(got.data, b"C");
    }

    #[test]
    fn lower_revision_is_rejected_with_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("registry.dat"), 8).unwrap();
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let tweak = Hash::new([4; 32]);

        registry.update(make_entry(&keypair, tweak, 5, b"A"), true).unwrap();
        let outcome = registry.update(make_entry(&keypair, tweak, 3, b"B"), true).unwrap();
        match outcome {
            UpdateOutcome::LowerRevNum { existing } => assert_eq!(existing.revision, 5),
            _ => panic!("expected LowerRevNum"),
        }
    }

    #[test]
    fn prune_removes_expired_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("registry.dat"), 8).unwrap();
        let keypair = SigningKeyPair::generate(&mut OsRng);

        let mut expiring = make_entry(&keypair, Hash::new([5; 32]), 1, b"old");
        expiring.expiry = 10;
        let msg = expiring.signed_message();
        expiring.signature = keypair.sign(&msg);
        registry.update(expiring, true).unwrap();

        let mut fresh = make_entry(&keypair, Hash::new([6; 32]), 1, b"new");
        fresh.expiry = 1000;
        let msg = fresh.signed_message();
        fresh.signature = keypair.sign(&msg);
        registry.update(fresh, true).unwrap();

        let pruned = registry.prune(500, true).unwrap();
        assert_eq!(pruned, 1);
        assert!(registry.get(&keypair.public_key(), &Hash::new([5; 32])).unwrap().is_none());
        assert!(registry.get(&keypair.public_key(), &Hash::new([6; 32])).unwrap().is_some());
    }

    #[test]
    fn registry_full_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        // max_entries=2 => only slot 1 is usable.
        let registry = Registry::open(dir.path().join("registry.dat"), 2).unwrap();
        let k1 = SigningKeyPair::generate(&mut OsRng);
        let k2 = SigningKeyPair::generate(&mut OsRng);
        registry.update(make_entry(&k1, Hash::new([1; 32]), 1, b"A"), true).unwrap();
        let err = registry.update(make_entry(&k2, Hash::new([2; 32]), 1, b"B"), true);
        assert!(matches!(err, Err(HostError::RegistryFull)));
    }
}
