//! Shared fixtures for key manager integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tlfk_core::{FolderHandle, TlfId, UserId};
use tlfk_crypto::{
    BlockCryptKey, BlockCryptKeyServerHalf, CryptPrivateKey, CryptPublicKey, CryptoError,
    CryptoPrimitives, StandardCrypto, TlfCryptKey, TlfCryptKeyClientHalf, TlfCryptKeyServerHalf,
    TlfEphemeralPrivateKey, TlfEphemeralPublicKey, TlfKeys,
};
use tlfk_keyman::{
    DeviceDirectory, FolderKeyMetadata, Identity, IdentityError, KeyManager, KeyOps,
    LocalIdentity, MemoryKeyCache, MemoryKeyOps,
};

pub fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

pub fn folder(writers: &[&str], readers: &[&str]) -> FolderKeyMetadata {
    FolderKeyMetadata::new(
        TlfId::generate(),
        FolderHandle::new(
            writers.iter().map(|w| user(w)).collect(),
            readers.iter().map(|r| user(r)).collect(),
        ),
    )
}

/// Crypto primitives that count every call.
pub struct CountingCrypto {
    inner: StandardCrypto,
    calls: AtomicUsize,
}

impl CountingCrypto {
    pub fn new(inner: StandardCrypto) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl CryptoPrimitives for CountingCrypto {
    fn make_random_tlf_keys(&self) -> Result<TlfKeys, CryptoError> {
        self.tick();
        self.inner.make_random_tlf_keys()
    }

    fn make_random_tlf_crypt_key_server_half(
        &self,
    ) -> Result<TlfCryptKeyServerHalf, CryptoError> {
        self.tick();
        self.inner.make_random_tlf_crypt_key_server_half()
    }

    fn make_random_block_crypt_key_server_half(
        &self,
    ) -> Result<BlockCryptKeyServerHalf, CryptoError> {
        self.tick();
        self.inner.make_random_block_crypt_key_server_half()
    }

    fn mask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        key: &TlfCryptKey,
    ) -> Result<TlfCryptKeyClientHalf, CryptoError> {
        self.tick();
        self.inner.mask_tlf_crypt_key(server_half, key)
    }

    fn unmask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<TlfCryptKey, CryptoError> {
        self.tick();
        self.inner.unmask_tlf_crypt_key(server_half, client_half)
    }

    fn unmask_block_crypt_key(
        &self,
        server_half: &BlockCryptKeyServerHalf,
        tlf_key: &TlfCryptKey,
    ) -> Result<BlockCryptKey, CryptoError> {
        self.tick();
        self.inner.unmask_block_crypt_key(server_half, tlf_key)
    }

    fn encrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<Vec<u8>, CryptoError> {
        self.tick();
        self.inner
            .encrypt_tlf_crypt_key_client_half(ephemeral, device, client_half)
    }

    fn decrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPublicKey,
        wrapped: &[u8],
    ) -> Result<TlfCryptKeyClientHalf, CryptoError> {
        self.tick();
        self.inner.decrypt_tlf_crypt_key_client_half(ephemeral, wrapped)
    }
}

/// Identity that counts every call.
pub struct CountingIdentity {
    inner: LocalIdentity,
    calls: AtomicUsize,
}

impl CountingIdentity {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Identity for CountingIdentity {
    async fn current_user(&self) -> Result<UserId, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.current_user().await
    }

    async fn current_crypt_public_key(&self) -> Result<CryptPublicKey, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.current_crypt_public_key().await
    }

    async fn crypt_public_keys(
        &self,
        user: &UserId,
    ) -> Result<BTreeSet<CryptPublicKey>, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.crypt_public_keys(user).await
    }

    async fn authorized_users(
        &self,
        handle: &FolderHandle,
    ) -> Result<BTreeSet<UserId>, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.authorized_users(handle).await
    }
}

/// A key manager for one device, with handles on its collaborators.
pub struct Client {
    pub manager: Arc<KeyManager>,
    pub cache: Arc<MemoryKeyCache>,
    pub crypto: Arc<CountingCrypto>,
    pub identity: Arc<CountingIdentity>,
    pub public_key: CryptPublicKey,
}

impl Client {
    /// Total crypto and identity calls made so far.
    pub fn collaborator_calls(&self) -> usize {
        self.crypto.calls() + self.identity.calls()
    }
}

struct EnrolledDevice {
    user: UserId,
    name: String,
    private: CryptPrivateKey,
}

/// Users, their devices and one shared key server.
pub struct World {
    pub ops: Arc<MemoryKeyOps>,
    pub directory: DeviceDirectory,
    devices: Vec<EnrolledDevice>,
}

impl World {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(MemoryKeyOps::new()),
            directory: DeviceDirectory::default(),
            devices: Vec::new(),
        }
    }

    pub fn enroll(&mut self, user_name: &str, device_name: &str) -> CryptPublicKey {
        let private = CryptPrivateKey::generate();
        let public = private.public_key();
        self.directory
            .enroll(&user(user_name), device_name, public, None)
            .unwrap();
        self.devices.push(EnrolledDevice {
            user: user(user_name),
            name: device_name.to_string(),
            private,
        });
        public
    }

    pub fn revoke(&mut self, user_name: &str, device_name: &str) {
        assert!(self.directory.revoke(&user(user_name), device_name));
    }

    /// A fresh client (cold cache) on the named device, using the shared key server.
    pub fn client(&self, user_name: &str, device_name: &str) -> Client {
        self.client_with_ops(user_name, device_name, self.ops.clone())
    }

    pub fn client_with_ops(
        &self,
        user_name: &str,
        device_name: &str,
        ops: Arc<dyn KeyOps>,
    ) -> Client {
        let device = self
            .devices
            .iter()
            .find(|d| d.user.as_str() == user_name && d.name == device_name)
            .expect("device not enrolled");
        let public_key = device.private.public_key();

        let cache = Arc::new(MemoryKeyCache::new());
        let crypto = Arc::new(CountingCrypto::new(StandardCrypto::new(
            device.private.clone(),
        )));
        let identity = Arc::new(CountingIdentity {
            inner: LocalIdentity::new(device.user.clone(), public_key, self.directory.clone()),
            calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(KeyManager::new(
            cache.clone(),
            ops,
            crypto.clone(),
            identity.clone(),
        ));
        Client {
            manager,
            cache,
            crypto,
            identity,
            public_key,
        }
    }
}
