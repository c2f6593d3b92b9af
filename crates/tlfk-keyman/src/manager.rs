//! The key manager: derives folder and block keys and performs rekeys.
//!
//! Read path (folder key): cache, then current device, bundle entry,
//! client-half unwrap, server half from the key server, unmask, key check,
//! cache. Block keys add a future-version guard and a block server half on
//! top of the folder key at the block's recorded version.
//!
//! Nothing is written to the cache until a derivation has fully succeeded,
//! and dropping an in-flight future leaves the cache untouched.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tlfk_core::{BlockId, KeyVersion, Path, UserId};
use tlfk_crypto::{
    BlockCryptKey, BlockCryptKeyServerHalf, CryptPublicKey, CryptoPrimitives, TlfCryptKey,
};

use crate::bundle::{FolderKeyMetadata, KeyBundle, WrappedClientHalf};
use crate::cache::KeyCache;
use crate::error::{KeyManagerError, KeyManagerResult};
use crate::identity::Identity;
use crate::ops::KeyOps;

/// Default bound on every key server and identity call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// A freshly made block key, ready to be stored with
/// [`KeyManager::put_block_crypt_key`] once the block id is known.
#[derive(Debug)]
pub struct NewBlockKey {
    pub key: BlockCryptKey,
    pub server_half: BlockCryptKeyServerHalf,
    /// Folder key version the block key was derived from; record it in the
    /// block pointer.
    pub key_version: KeyVersion,
}

pub struct KeyManager {
    cache: Arc<dyn KeyCache>,
    key_ops: Arc<dyn KeyOps>,
    crypto: Arc<dyn CryptoPrimitives>,
    identity: Arc<dyn Identity>,
    op_timeout: Duration,
}

impl KeyManager {
    pub fn new(
        cache: Arc<dyn KeyCache>,
        key_ops: Arc<dyn KeyOps>,
        crypto: Arc<dyn CryptoPrimitives>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            cache,
            key_ops,
            crypto,
            identity,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Run a collaborator call under the operation timeout.
    async fn bounded<T, E>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> KeyManagerResult<T>
    where
        KeyManagerError: From<E>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(KeyManagerError::from),
            Err(_) => Err(KeyManagerError::Timeout {
                op,
                timeout: self.op_timeout,
            }),
        }
    }

    fn check_folder(path: &Path, md: &FolderKeyMetadata) -> KeyManagerResult<()> {
        if path.tlf != md.id {
            return Err(KeyManagerError::FolderMismatch {
                path_tlf: path.tlf,
                tlf: md.id,
            });
        }
        Ok(())
    }

    fn latest_version(md: &FolderKeyMetadata) -> KeyManagerResult<KeyVersion> {
        md.latest_key_version()
            .ok_or_else(|| KeyManagerError::Unkeyed {
                folder: md.display_name(),
            })
    }

    /// Folder key at the latest key version in `md`.
    pub async fn get_tlf_crypt_key(
        &self,
        path: &Path,
        md: &FolderKeyMetadata,
    ) -> KeyManagerResult<TlfCryptKey> {
        let latest = Self::latest_version(md)?;
        self.get_tlf_crypt_key_at_version(path, md, latest).await
    }

    /// Folder key at an explicit key version.
    pub async fn get_tlf_crypt_key_at_version(
        &self,
        path: &Path,
        md: &FolderKeyMetadata,
        version: KeyVersion,
    ) -> KeyManagerResult<TlfCryptKey> {
        Self::check_folder(path, md)?;

        if let Some(key) = self.cache.get_tlf_crypt_key(&md.id, version) {
            debug!(folder = %md.id, %version, "tlf key cache hit");
            return Ok(key);
        }
        debug!(folder = %md.id, %version, %path, "tlf key cache miss");

        let latest = Self::latest_version(md)?;
        if version > latest {
            return Err(KeyManagerError::NewKeyVersion {
                folder: md.display_name(),
                version,
            });
        }
        let bundle = md
            .bundle(version)
            .ok_or_else(|| KeyManagerError::MissingKeyBundle {
                folder: md.display_name(),
                version,
            })?;

        let user = self
            .bounded("current_user", self.identity.current_user())
            .await?;
        let device = self
            .bounded(
                "current_crypt_public_key",
                self.identity.current_crypt_public_key(),
            )
            .await?;
        let kid = device.kid();
        let wrapped =
            bundle
                .entry(&user, &kid)
                .ok_or_else(|| KeyManagerError::MissingBundleEntry {
                    folder: md.display_name(),
                    version,
                    user: user.clone(),
                    kid: kid.clone(),
                })?;

        let client_half = self.crypto.decrypt_tlf_crypt_key_client_half(
            &bundle.tlf_ephemeral_public_key,
            wrapped.as_bytes(),
        )?;
        let server_half = self
            .bounded(
                "get_tlf_crypt_key_server_half",
                self.key_ops
                    .get_tlf_crypt_key_server_half(md.id, version, &device),
            )
            .await?;
        let key = self
            .crypto
            .unmask_tlf_crypt_key(&server_half, &client_half)?;

        if !bundle.verify_key_check(&key) {
            return Err(KeyManagerError::Integrity {
                folder: md.display_name(),
                version,
            });
        }

        debug!(folder = %md.id, %version, %kid, "derived tlf key");
        Ok(self.cache.put_tlf_crypt_key(md.id, version, key))
    }

    /// Key for an existing block, derived from the folder key at the block's
    /// recorded key version.
    pub async fn get_block_crypt_key(
        &self,
        path: &Path,
        block: &BlockId,
        md: &FolderKeyMetadata,
    ) -> KeyManagerResult<BlockCryptKey> {
        if let Some(key) = self.cache.get_block_crypt_key(block) {
            debug!(%block, "block key cache hit");
            return Ok(key);
        }
        debug!(%block, %path, "block key cache miss");

        let version = path
            .key_version_for(block)
            .ok_or(KeyManagerError::NoBlockPointer { block: *block })?;

        // No local share can exist for a version newer than the metadata.
        let known = md.latest_key_version();
        if known.map_or(true, |latest| version > latest) {
            return Err(KeyManagerError::NewKeyVersion {
                folder: md.display_name(),
                version,
            });
        }

        let tlf_key = self.get_tlf_crypt_key_at_version(path, md, version).await?;
        let server_half = self
            .bounded(
                "get_block_crypt_key_server_half",
                self.key_ops.get_block_crypt_key_server_half(block),
            )
            .await?;
        let key = self
            .crypto
            .unmask_block_crypt_key(&server_half, &tlf_key)?;

        debug!(%block, %version, "derived block key");
        Ok(self.cache.put_block_crypt_key(*block, key))
    }

    /// Make a key for a new block under the folder's latest key version.
    pub async fn make_block_crypt_key(
        &self,
        path: &Path,
        md: &FolderKeyMetadata,
    ) -> KeyManagerResult<NewBlockKey> {
        let key_version = Self::latest_version(md)?;
        let tlf_key = self
            .get_tlf_crypt_key_at_version(path, md, key_version)
            .await?;
        let server_half = self.crypto.make_random_block_crypt_key_server_half()?;
        let key = self
            .crypto
            .unmask_block_crypt_key(&server_half, &tlf_key)?;
        Ok(NewBlockKey {
            key,
            server_half,
            key_version,
        })
    }

    /// Store a new block's server half and cache its key under `block`.
    pub async fn put_block_crypt_key(
        &self,
        block: BlockId,
        new_key: NewBlockKey,
    ) -> KeyManagerResult<BlockCryptKey> {
        self.bounded(
            "put_block_crypt_key_server_half",
            self.key_ops
                .put_block_crypt_key_server_half(&block, &new_key.server_half),
        )
        .await?;
        debug!(%block, version = %new_key.key_version, "stored block key");
        Ok(self.cache.put_block_crypt_key(block, new_key.key))
    }

    /// Create the next key generation for every active device of every
    /// authorized user and append its bundle to `md`.
    ///
    /// `md` is only modified once every server half has been stored. Callers
    /// must serialize rekeys of the same folder.
    pub async fn rekey(&self, md: &mut FolderKeyMetadata) -> KeyManagerResult<KeyVersion> {
        let folder = md.display_name();
        let new_version = md
            .next_key_version()
            .ok_or_else(|| KeyManagerError::KeyVersionOverflow {
                folder: folder.clone(),
            })?;

        let keys = self.crypto.make_random_tlf_keys()?;
        let server_half = self.crypto.make_random_tlf_crypt_key_server_half()?;

        let users = self
            .bounded("authorized_users", self.identity.authorized_users(&md.handle))
            .await?;
        if users.is_empty() {
            return Err(KeyManagerError::NoAuthorizedUsers { folder });
        }
        let mut devices: Vec<(UserId, CryptPublicKey)> = Vec::new();
        for user in users {
            let user_devices = self
                .bounded("crypt_public_keys", self.identity.crypt_public_keys(&user))
                .await?;
            if user_devices.is_empty() {
                return Err(KeyManagerError::UserHasNoDevices { folder, user });
            }
            devices.extend(user_devices.into_iter().map(|k| (user.clone(), k)));
        }

        // Server halves are stored per device key, so a key may appear once.
        let mut kids = BTreeSet::new();
        for (user, device) in &devices {
            if !kids.insert(device.kid()) {
                return Err(KeyManagerError::DuplicateDeviceKey {
                    folder,
                    user: user.clone(),
                    kid: device.kid(),
                });
            }
        }

        let mut bundle = KeyBundle::new(keys.public, keys.ephemeral_public, &keys.crypt_key);
        for (user, device) in &devices {
            let client_half = self
                .crypto
                .mask_tlf_crypt_key(&server_half, &keys.crypt_key)?;
            let wrapped = self.crypto.encrypt_tlf_crypt_key_client_half(
                &keys.ephemeral_private,
                device,
                &client_half,
            )?;
            let inserted =
                bundle.insert(user.clone(), device.kid(), WrappedClientHalf::new(wrapped));
            debug_assert!(inserted, "device keys are unique");
        }

        for (user, device) in &devices {
            self.bounded(
                "put_tlf_crypt_key_server_half",
                self.key_ops.put_tlf_crypt_key_server_half(
                    md.id,
                    new_version,
                    user,
                    device,
                    &server_half,
                ),
            )
            .await?;
        }

        let version = md
            .add_key_bundle(bundle)
            .ok_or(KeyManagerError::KeyVersionOverflow { folder })?;
        self.cache
            .put_tlf_crypt_key(md.id, version, keys.crypt_key.clone());

        info!(
            folder = %md.id,
            %version,
            devices = devices.len(),
            fingerprint = %keys.crypt_key.fingerprint(),
            "rekeyed folder"
        );
        Ok(version)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}
