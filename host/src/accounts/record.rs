//! On-disk layout for a single ephemeral account record:
//! `{id(32) || balance(16, LE big-int) || last_txn_time(8, LE)}`, padded
//! to `ACCOUNT_RECORD_SIZE`. A record whose `last_txn_time == 0` is free.

use host_common::crypto::Hash;
use host_common::serializer::{Reader, ReaderError, Writer};

use crate::config::ACCOUNT_RECORD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account_id: Hash,
    pub balance: u128,
    pub last_txn_time: u64,
}

impl AccountRecord {
    pub fn is_free(&self) -> bool {
        self.last_txn_time == 0
    }

    pub fn free() -> Self {
        Self {
            account_id: Hash::zero(),
            balance: 0,
            last_txn_time: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(ACCOUNT_RECORD_SIZE);
        w.write_hash(&self.account_id);
        w.write_u128(self.balance);
        w.write_u64(self.last_txn_time);
        w.pad_to(ACCOUNT_RECORD_SIZE);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReaderError> {
        if bytes.len() != ACCOUNT_RECORD_SIZE {
            return Err(ReaderError::InvalidValue(format!(
                "account record must be {ACCOUNT_RECORD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = Reader::new(bytes);
        let account_id = r.read_hash()?;
        let balance = r.read_u128()?;
        let last_txn_time = r.read_u64()?;
        Ok(Self {
            account_id,
            balance,
            last_txn_time,
        })
    }
}
