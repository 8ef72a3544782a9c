//! On-disk byte layout for a single 256-byte registry slot. Every
//! multi-byte integer is little-endian.

use host_common::crypto::{hash_all, Hash, PublicKey, Signature, SignatureAlgorithm};
use host_common::serializer::{Reader, ReaderError, Writer};

use crate::config::{REGISTRY_DATA_SIZE, REGISTRY_ENTRY_SIZE};

/// Entry type tag. `Regular` carries opaque renter data; `WithPubkey`
/// embeds the signer's own public key inside `data` so that ownership of
/// an entry can be proven without out-of-band knowledge of the key
/// (mirrors the "set once" registry entries used for host announcement
/// style records).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular = 0,
    WithPubkey = 1,
}

impl EntryType {
    fn from_tag(tag: u8) -> Result<Self, ReaderError> {
        match tag {
            0 => Ok(EntryType::Regular),
            1 => Ok(EntryType::WithPubkey),
            other => Err(ReaderError::InvalidValue(format!("unknown registry entry type tag {other}"))),
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub public_key: PublicKey,
    pub tweak: Hash,
    pub expiry: u32,
    pub data: Vec<u8>,
    pub revision: u64,
    pub signature: Signature,
    pub entry_type: EntryType,
}

impl RegistryEntry {
    /// `hash(public_key || tweak)`, the key under which the entry is
    /// indexed in the free-list/occupancy map.
    pub fn map_key(&self) -> Hash {
        hash_all(&[&self.public_key.algorithm().tag().to_le_bytes(), self.public_key.as_bytes(), self.tweak.as_bytes()])
    }

    /// The bytes the signature covers: `tweak || data || revision(LE64)`.
    pub fn signed_message(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32 + self.data.len() + 8);
        w.write_hash(&self.tweak);
        w.write_bytes(&self.data);
        w.write_u64(self.revision);
        w.into_bytes()
    }

    pub fn verify_signature(&self) -> Result<(), host_common::crypto::CryptoError> {
        let message = self.signed_message();
        self.public_key.verify(&message, &self.signature)
    }

    /// Serialize to an exact `REGISTRY_ENTRY_SIZE`-byte slot, zero-padded.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(REGISTRY_ENTRY_SIZE);
        w.write_u8(self.public_key.algorithm().tag());
        w.write_bytes(self.public_key.as_bytes());
        w.write_hash(&self.tweak);
        w.write_u32(self.expiry);
        w.write_u8(self.data.len() as u8);
        w.write_bytes(&self.data);
        w.pad_to(w.len() + (REGISTRY_DATA_SIZE - self.data.len()));
        w.write_u64(self.revision);
        w.write_bytes(self.signature.as_bytes());
        w.write_u8(self.entry_type.tag());
        w.pad_to(REGISTRY_ENTRY_SIZE);
        w.into_bytes()
    }

    /// Decode a 256-byte slot. Returns `Ok(None)` for the `noKey`
    /// sentinel (free slot) rather than erroring.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ReaderError> {
        if bytes.len() != REGISTRY_ENTRY_SIZE {
            return Err(ReaderError::InvalidValue(format!(
                "registry slot must be {REGISTRY_ENTRY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = Reader::new(bytes);
        let algorithm_tag = r.read_u8()?;
        let key: [u8; 32] = r.read_array()?;
        if algorithm_tag == 0 && key == [0u8; 32] {
            return Ok(None);
        }
        let public_key = PublicKey::parse(algorithm_tag, key)
            .map_err(|e| ReaderError::InvalidValue(e.to_string()))?;
        let tweak = r.read_hash()?;
        let expiry = r.read_u32()?;
        let data_len = r.read_u8()? as usize;
        if data_len > REGISTRY_DATA_SIZE {
            return Err(ReaderError::InvalidValue(format!(
                "registry data length {data_len} exceeds max {REGISTRY_DATA_SIZE}"
            )));
        }
        let data = r.read_bytes(data_len)?;
        let _ = r.read_bytes(REGISTRY_DATA_SIZE - data_len)?;
        let revision = r.read_u64()?;
        let signature = Signature::from_bytes(r.read_array()?);
        let entry_type = EntryType::from_tag(r.read_u8()?)?;

        Ok(Some(RegistryEntry {
            public_key,
            tweak,
            expiry,
            data,
            revision,
            signature,
            entry_type,
        }))
    }

    pub fn is_no_key(bytes: &[u8]) -> bool {
        bytes.len() >= 33 && bytes[0] == 0 && bytes[1..33].iter().all(|&b| b == 0)
    }
}

/// Re-exported so callers don't need to depend on `host_common` just to
/// build a key tag.
pub fn algorithm_tag(alg: SignatureAlgorithm) -> u8 {
    alg.tag()
}
