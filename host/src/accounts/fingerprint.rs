//! At-most-once withdrawal anti-replay set (spec §3 "Fingerprint", §4.2
//! "Fingerprint store", §6 "Fingerprint bucket filename").
//!
//! Two append-only bucket files cover adjacent ranges of
//! `bucket_block_range` blocks each: `[min, min+N)` (current) and
//! `[min+N, min+2N)` (next). A background persist loop drains a queue
//! and appends each fingerprint to whichever bucket its expiry falls
//! in; on a height crossing the buckets rotate and the file that falls
//! entirely below the new current range becomes safe to delete.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use host_common::crypto::Hash;
use log::{error, info};
use tokio::sync::mpsc;

use crate::config::FINGERPRINT_SIZE;
use crate::error::{ExternalError, HostError};

pub const BUCKET_METADATA_SPECIFIER: &[u8] = b"host-fingerprint-bucket-v1\0\0\0\0\0";
pub const BUCKET_METADATA_SIZE: usize = 32;

/// `withdraw(message) + expiry` hashed together, the unit of replay
/// protection (spec §3).
pub fn derive(message: &[u8], expiry: u64) -> Hash {
    host_common::crypto::hash_all(&[message, &expiry.to_le_bytes()])
}

fn bucket_filename(min: u64, max: u64) -> String {
    format!("fingerprintsbucket_{min}-{max}.db")
}

struct BucketFile {
    min: u64,
    max: u64,
    path: PathBuf,
    file: File,
}

impl BucketFile {
    fn create(dir: &Path, min: u64, max: u64) -> Result<Self, HostError> {
        let path = dir.join(bucket_filename(min, max));
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        if !existed {
            file.write_all(BUCKET_METADATA_SPECIFIER)
                .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        }
        Ok(Self { min, max, path, file })
    }

    fn load_fingerprints(&self) -> Result<HashSet<Hash>, HostError> {
        let mut bytes = Vec::new();
        File::open(&self.path)
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?
            .read_to_end(&mut bytes)
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        if bytes.len() < BUCKET_METADATA_SIZE {
            return Err(HostError::Corruption(format!(
                "fingerprint bucket {:?} shorter than its metadata specifier",
                self.path
            )));
        }
        let mut set = HashSet::new();
        let entries = &bytes[BUCKET_METADATA_SIZE..];
        for chunk in entries.chunks(FINGERPRINT_SIZE) {
            if chunk.len() != FINGERPRINT_SIZE {
                error!("fingerprint bucket {:?} has a trailing partial entry, skipping", self.path);
                break;
            }
            let arr: [u8; 32] = chunk.try_into().unwrap();
            set.insert(Hash::new(arr));
        }
        Ok(set)
    }

    fn append(&mut self, fp: &Hash) -> Result<(), HostError> {
        self.file
            .write_all(fp.as_bytes())
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        self.file
            .sync_data()
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))
    }
}

struct Inner {
    dir: PathBuf,
    current: BucketFile,
    next: BucketFile,
    /// Union of both buckets' fingerprints, for O(1) membership checks.
    seen: HashSet<Hash>,
    /// Disables rotation; used by tests that need deterministic buckets.
    rotation_disabled: bool,
}

impl Inner {
    fn open(dir: &Path, current_min: u64, bucket_block_range: u64) -> Result<Self, HostError> {
        std::fs::create_dir_all(dir).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        let current = BucketFile::create(dir, current_min, current_min + bucket_block_range)?;
        let next = BucketFile::create(dir, current_min + bucket_block_range, current_min + 2 * bucket_block_range)?;
        let mut seen = current.load_fingerprints()?;
        seen.extend(next.load_fingerprints()?);
        Ok(Self {
            dir: dir.to_path_buf(),
            current,
            next,
            seen,
            rotation_disabled: false,
        })
    }

    fn contains(&self, fp: &Hash) -> bool {
        self.seen.contains(fp)
    }

    /// Marks `fp` as seen in memory only. The caller is responsible for
    /// queuing the durable append; this is the atomic half of "checked
    /// and inserted atomically" (spec §5) and is what makes replay
    /// protection effective even before the background loop catches up.
    fn mark_seen(&mut self, fp: Hash) -> bool {
        self.seen.insert(fp)
    }

    fn append_to_disk(&mut self, fp: &Hash, expiry: u64) -> Result<(), HostError> {
        if expiry < self.next.max {
            self.current.append(fp)
        } else {
            self.next.append(fp)
        }
    }

    /// Roll buckets forward so `current` covers `new_height`. The old
    /// `current` file is deleted once it falls entirely below the new
    /// current range (spec §6: "files whose max is below the current
    /// bucket's min are safe to delete").
    fn rotate(&mut self, new_height: u64, bucket_block_range: u64) -> Result<(), HostError> {
        if self.rotation_disabled || new_height < self.current.max {
            return Ok(());
        }
        let stale_path = self.current.path.clone();
        let new_current_min = (new_height / bucket_block_range) * bucket_block_range;
        let new_current = BucketFile::create(&self.dir, new_current_min, new_current_min + bucket_block_range)?;
        let new_next = BucketFile::create(&self.dir, new_current_min + bucket_block_range, new_current_min + 2 * bucket_block_range)?;

        let mut seen = new_current.load_fingerprints()?;
        seen.extend(new_next.load_fingerprints()?);

        self.current = new_current;
        self.next = new_next;
        self.seen = seen;

        if stale_path != self.current.path {
            if let Err(e) = std::fs::remove_file(&stale_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!("failed to remove stale fingerprint bucket {stale_path:?}: {e}");
                }
            } else {
                info!("removed stale fingerprint bucket {stale_path:?}");
            }
        }
        Ok(())
    }
}

/// Queued append request, drained by the background persist loop.
pub struct PersistRequest {
    pub fingerprint: Hash,
    pub expiry: u64,
}

pub struct FingerprintStore {
    inner: Mutex<Inner>,
    bucket_block_range: u64,
    queue_tx: mpsc::UnboundedSender<PersistRequest>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<PersistRequest>>>,
}

impl FingerprintStore {
    pub fn open(dir: impl AsRef<Path>, current_height: u64, bucket_block_range: u64) -> Result<Self, HostError> {
        let current_min = (current_height / bucket_block_range) * bucket_block_range;
        let inner = Inner::open(dir.as_ref(), current_min, bucket_block_range)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Mutex::new(inner),
            bucket_block_range,
            queue_tx: tx,
            queue_rx: Mutex::new(Some(rx)),
        })
    }

    /// `true` if this fingerprint has already been spent.
    pub fn contains(&self, fp: &Hash) -> bool {
        self.inner.lock().expect("fingerprint mutex poisoned").contains(fp)
    }

    /// Atomically check-and-mark so two concurrent withdrawals of the
    /// same message race correctly: only the first succeeds (spec §5
    /// "fingerprints are checked and inserted atomically"). The durable
    /// append is queued for the background persist loop, not performed
    /// inline, matching the "persist loop pulls from a queue" design
    /// (spec §4.2).
    pub fn check_and_insert(&self, fp: Hash, expiry: u64) -> Result<bool, HostError> {
        let newly_marked = {
            let mut inner = self.inner.lock().expect("fingerprint mutex poisoned");
            if inner.contains(&fp) {
                false
            } else {
                inner.mark_seen(fp)
            }
        };
        if newly_marked && self.queue_tx.send(PersistRequest { fingerprint: fp, expiry }).is_err() {
            error!("fingerprint persist queue closed; appending inline");
            self.inner
                .lock()
                .expect("fingerprint mutex poisoned")
                .append_to_disk(&fp, expiry)?;
        }
        Ok(newly_marked)
    }

    pub fn rotate_if_needed(&self, new_height: u64) -> Result<(), HostError> {
        self.inner
            .lock()
            .expect("fingerprint mutex poisoned")
            .rotate(new_height, self.bucket_block_range)
    }

    #[cfg(test)]
    pub fn disable_rotation(&self) {
        self.inner.lock().expect("fingerprint mutex poisoned").rotation_disabled = true;
    }

    pub fn queue_handle(&self) -> mpsc::UnboundedSender<PersistRequest> {
        self.queue_tx.clone()
    }

    /// Background persist loop: pulls queued fingerprints and appends
    /// them to whichever bucket their expiry belongs in. Exits when the
    /// queue closes or `stop` fires.
    pub async fn persist_loop(&self, stop: std::sync::Arc<tokio::sync::Notify>) {
        let mut rx = match self.queue_rx.lock().expect("fingerprint mutex poisoned").take() {
            Some(rx) => rx,
            None => return,
        };
        loop {
            tokio::select! {
                item = rx.recv() => {
                    match item {
                        Some(req) => {
                            if let Err(e) = self.check_and_insert(req.fingerprint, req.expiry) {
                                error!("fingerprint persist failed: {e}");
                            }
                        }
                        None => break,
                    }
                }
                _ = stop.notified() => break,
            }
        }
    }
}
