use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CryptoError {
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKeyLength { expected: usize, got: usize },

    #[error("invalid signature length: expected {expected}, got {got}")]
    InvalidSignatureLength { expected: usize, got: usize },

    #[error("malformed public key bytes")]
    MalformedPublicKey,

    #[error("malformed signature bytes")]
    MalformedSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(u8),
}
