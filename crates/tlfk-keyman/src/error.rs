use std::time::Duration;
use thiserror::Error;

use tlfk_core::{BlockId, KeyVersion, TlfId, UserId};
use tlfk_crypto::{CryptoError, Kid};

use crate::identity::IdentityError;
use crate::ops::KeyOpsError;

pub type KeyManagerResult<T> = Result<T, KeyManagerError>;

/// Failures surfaced by the key manager. Messages name folders, users and
/// key ids only; key material never appears here.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error("folder {folder} has not been keyed yet")]
    Unkeyed { folder: String },

    #[error("folder {folder} has no key bundle for key version {version}")]
    MissingKeyBundle { folder: String, version: KeyVersion },

    #[error("device {kid} of user {user} has no key for folder {folder} at key version {version}")]
    MissingBundleEntry {
        folder: String,
        version: KeyVersion,
        user: UserId,
        kid: Kid,
    },

    /// The requested key generation is newer than anything this device has
    /// been granted. Only a rekey by another authorized device fixes this.
    #[error(
        "folder {folder} uses key version {version}, which this device has not been given; \
         ask a device that can read the folder to rekey it for this device"
    )]
    NewKeyVersion { folder: String, version: KeyVersion },

    #[error("path belongs to folder {path_tlf}, but metadata is for folder {tlf}")]
    FolderMismatch { path_tlf: TlfId, tlf: TlfId },

    #[error("path has no block pointer for block {block}")]
    NoBlockPointer { block: BlockId },

    #[error("folder {folder} has no authorized users")]
    NoAuthorizedUsers { folder: String },

    #[error("user {user} has no active devices; cannot rekey folder {folder}")]
    UserHasNoDevices { folder: String, user: UserId },

    #[error("device key {kid} of user {user} is listed more than once; cannot rekey folder {folder}")]
    DuplicateDeviceKey { folder: String, user: UserId, kid: Kid },

    #[error("key version overflow for folder {folder}")]
    KeyVersionOverflow { folder: String },

    #[error("reconstructed key for folder {folder} at key version {version} failed its integrity check")]
    Integrity { folder: String, version: KeyVersion },

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("key server error: {0}")]
    KeyOps(#[from] KeyOpsError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl KeyManagerError {
    /// Transient collaborator failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::KeyOps(e) => e.is_retryable(),
            Self::Identity(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Stored or reconstructed key material did not authenticate. Fatal.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::Integrity { .. } => true,
            Self::Crypto(e) => e.is_integrity_failure(),
            _ => false,
        }
    }
}
