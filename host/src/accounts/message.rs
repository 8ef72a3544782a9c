//! Withdrawal message: the payload a renter signs to authorize a debit
//! from their ephemeral account.

use host_common::crypto::{hash_all, Hash, PublicKey};
use host_common::serializer::Writer;

/// `account_id = hash(algorithm || public_key)`.
pub fn account_id_for(public_key: &PublicKey) -> Hash {
    hash_all(&[&[public_key.algorithm().tag()], public_key.as_bytes()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalMessage {
    pub account_id: Hash,
    pub public_key: PublicKey,
    pub amount: u128,
    pub expiry: u64,
}

impl WithdrawalMessage {
    /// The exact bytes the renter signs and that the fingerprint is
    /// derived from.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        w.write_hash(&self.account_id);
        w.write_u128(self.amount);
        w.write_u64(self.expiry);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host_common::crypto::SigningKeyPair;
    use rand::rngs::OsRng;

    #[test]
    fn account_id_is_deterministic() {
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let a = account_id_for(&keypair.public_key());
        let b = account_id_for(&keypair.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn signed_bytes_change_with_amount() {
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let account_id = account_id_for(&keypair.public_key());
        let a = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 5,
            expiry: 10,
        };
        let b = WithdrawalMessage { amount: 6, ..a.clone() };
        assert_ne!(a.signed_bytes(), b.signed_bytes());
    }
}
