//! Identity collaborator: who is running, on which device, and which
//! devices each folder member owns.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use tlfk_core::{FolderHandle, UserId};
use tlfk_crypto::CryptPublicKey;

use crate::devices::DeviceDirectory;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("no current device key")]
    NoDeviceKey,

    #[error("identity service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IdentityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn current_user(&self) -> Result<UserId, IdentityError>;

    /// Public half of this device's key pair.
    async fn current_crypt_public_key(&self) -> Result<CryptPublicKey, IdentityError>;

    /// Public keys of the user's active devices. May be empty.
    async fn crypt_public_keys(
        &self,
        user: &UserId,
    ) -> Result<BTreeSet<CryptPublicKey>, IdentityError>;

    /// Users that must be able to read the folder.
    async fn authorized_users(
        &self,
        handle: &FolderHandle,
    ) -> Result<BTreeSet<UserId>, IdentityError> {
        Ok(handle.members())
    }
}

/// Identity resolved from a local device directory.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    user: UserId,
    device_key: Option<CryptPublicKey>,
    directory: DeviceDirectory,
}

impl LocalIdentity {
    pub fn new(user: UserId, device_key: CryptPublicKey, directory: DeviceDirectory) -> Self {
        Self {
            user,
            device_key: Some(device_key),
            directory,
        }
    }

    /// An identity that can rekey for others but has no device of its own.
    pub fn without_device(user: UserId, directory: DeviceDirectory) -> Self {
        Self {
            user,
            device_key: None,
            directory,
        }
    }
}

#[async_trait]
impl Identity for LocalIdentity {
    async fn current_user(&self) -> Result<UserId, IdentityError> {
        Ok(self.user.clone())
    }

    async fn current_crypt_public_key(&self) -> Result<CryptPublicKey, IdentityError> {
        self.device_key.ok_or(IdentityError::NoDeviceKey)
    }

    async fn crypt_public_keys(
        &self,
        user: &UserId,
    ) -> Result<BTreeSet<CryptPublicKey>, IdentityError> {
        self.directory
            .active_keys(user)
            .ok_or_else(|| IdentityError::UnknownUser(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlfk_crypto::CryptPrivateKey;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_local_identity() {
        let laptop = CryptPrivateKey::generate().public_key();
        let mut directory = DeviceDirectory::default();
        directory.enroll(&user("alice"), "laptop", laptop, None).unwrap();

        let id = LocalIdentity::new(user("alice"), laptop, directory);
        assert_eq!(id.current_user().await.unwrap(), user("alice"));
        assert_eq!(id.current_crypt_public_key().await.unwrap(), laptop);
        assert_eq!(
            id.crypt_public_keys(&user("alice")).await.unwrap(),
            BTreeSet::from([laptop])
        );

        let err = id.crypt_public_keys(&user("bob")).await.unwrap_err();
        assert!(matches!(err, IdentityError::UnknownUser(u) if u == user("bob")));
    }

    #[tokio::test]
    async fn test_authorized_users_defaults_to_members() {
        let id = LocalIdentity::without_device(user("alice"), DeviceDirectory::default());
        let handle = FolderHandle::new(vec![user("alice")], vec![user("bob"), user("alice")]);
        let users = id.authorized_users(&handle).await.unwrap();
        assert_eq!(users, BTreeSet::from([user("alice"), user("bob")]));
        assert!(matches!(
            id.current_crypt_public_key().await,
            Err(IdentityError::NoDeviceKey)
        ));
    }
}
