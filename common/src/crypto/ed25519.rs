//! Ed25519 key and signature types for renter authentication: ephemeral
//! account withdrawals and registry entry signatures both use the same
//! compressed `(algorithm, key)` representation so they serialize
//! identically on disk.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::CryptoError;

pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Signature algorithm tag, as stored in a registry entry's compressed
/// public key. Every algorithm other than ed25519 is rejected at parse
/// time (spec: "Contract identifier / signature algorithms").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    Ed25519 = 1,
}

impl SignatureAlgorithm {
    pub fn from_tag(tag: u8) -> Result<Self, CryptoError> {
        match tag {
            1 => Ok(SignatureAlgorithm::Ed25519),
            other => Err(CryptoError::UnsupportedAlgorithm(other)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A compressed ed25519 public key: 1-byte algorithm tag followed by the
/// 32-byte key. The all-zero key with algorithm 0 is the registry's
/// `noKey` sentinel and is handled by callers, not by this type.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    algorithm: SignatureAlgorithm,
    key: [u8; ED25519_PUBLIC_KEY_SIZE],
}

impl PublicKey {
    pub fn from_bytes(key: [u8; ED25519_PUBLIC_KEY_SIZE]) -> Self {
        Self {
            algorithm: SignatureAlgorithm::Ed25519,
            key,
        }
    }

    pub fn parse(algorithm_tag: u8, key: [u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        let algorithm = SignatureAlgorithm::from_tag(algorithm_tag)?;
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        &self.key
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.key).map_err(|_| CryptoError::MalformedPublicKey)?;
        let dalek_sig = DalekSignature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &dalek_sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.key))
    }
}

/// A 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature([u8; ED25519_SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; ED25519_SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ED25519_SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

/// A keypair usable in tests and by renter-side test harnesses to sign
/// withdrawal messages and registry entries.
pub struct SigningKeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl SigningKeyPair {
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.signing_key.sign(message).to_bytes())
    }
}
