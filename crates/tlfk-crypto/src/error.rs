use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("no device private key loaded")]
    NoDeviceKey,

    #[error("client half encryption failed: {0}")]
    Encrypt(String),

    #[error("client half decryption failed: invalid device key or corrupted data")]
    Decrypt,

    #[error("wrapped client half has wrong size: {got} bytes (expected {expected})")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid key encoding: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),
}

impl CryptoError {
    /// Authentication or shape failures on stored key material. These never
    /// go away on retry.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Decrypt | Self::InvalidLength { .. })
    }
}
