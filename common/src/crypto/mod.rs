mod ed25519;
mod error;
mod hash;

pub use ed25519::{PublicKey, Signature, SigningKeyPair, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
pub use error::CryptoError;
pub use hash::{hash, hash_all, Hash, HASH_SIZE};
