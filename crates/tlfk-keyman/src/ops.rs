//! Key server operations: storage of folder and block key server halves.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

use tlfk_core::{BlockId, KeyVersion, TlfId, UserId};
use tlfk_crypto::{BlockCryptKeyServerHalf, CryptPublicKey, Kid, TlfCryptKeyServerHalf};

#[derive(Debug, Error)]
pub enum KeyOpsError {
    #[error("server half not found: {0}")]
    NotFound(String),

    /// A different server half is already stored under the same key.
    #[error("server half already stored: {0}")]
    Conflict(String),

    #[error("key server unavailable: {0}")]
    Unavailable(String),

    #[error("key server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeyOpsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

/// The key server.
///
/// Folder server halves are keyed by (folder, version, device) and a put
/// replaces any earlier record, so an abandoned rekey can be retried at the
/// same version. Block server halves are write-once: storing a different
/// value for a block fails with [`KeyOpsError::Conflict`], storing the same
/// value again succeeds.
#[async_trait]
pub trait KeyOps: Send + Sync {
    async fn get_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        device: &CryptPublicKey,
    ) -> Result<TlfCryptKeyServerHalf, KeyOpsError>;

    async fn put_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        user: &UserId,
        device: &CryptPublicKey,
        server_half: &TlfCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError>;

    async fn get_block_crypt_key_server_half(
        &self,
        block: &BlockId,
    ) -> Result<BlockCryptKeyServerHalf, KeyOpsError>;

    async fn put_block_crypt_key_server_half(
        &self,
        block: &BlockId,
        server_half: &BlockCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError>;
}

/// Per-operation call counts of a [`MemoryKeyOps`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOpsCalls {
    pub get_tlf: usize,
    pub put_tlf: usize,
    pub get_block: usize,
    pub put_block: usize,
}

impl KeyOpsCalls {
    pub fn total(&self) -> usize {
        self.get_tlf + self.put_tlf + self.get_block + self.put_block
    }
}

type TlfHalfKey = (TlfId, KeyVersion, Kid);

/// In-memory key server. Counts calls and can simulate an outage or a slow
/// server, which makes it the usual stand-in for the real one in tests.
#[derive(Default)]
pub struct MemoryKeyOps {
    tlf_halves: Mutex<HashMap<TlfHalfKey, (UserId, TlfCryptKeyServerHalf)>>,
    block_halves: Mutex<HashMap<BlockId, BlockCryptKeyServerHalf>>,
    get_tlf: AtomicUsize,
    put_tlf: AtomicUsize,
    get_block: AtomicUsize,
    put_block: AtomicUsize,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryKeyOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> KeyOpsCalls {
        KeyOpsCalls {
            get_tlf: self.get_tlf.load(Ordering::SeqCst),
            put_tlf: self.put_tlf.load(Ordering::SeqCst),
            get_block: self.get_block.load(Ordering::SeqCst),
            put_block: self.put_block.load(Ordering::SeqCst),
        }
    }

    /// While offline every call fails with [`KeyOpsError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Sleep this long before answering each call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Number of stored folder key server halves.
    pub fn tlf_half_count(&self) -> usize {
        self.tlf_halves.lock().len()
    }

    /// User recorded for a stored folder key server half.
    pub fn tlf_half_owner(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        device: &CryptPublicKey,
    ) -> Option<UserId> {
        self.tlf_halves
            .lock()
            .get(&(tlf, version, device.kid()))
            .map(|(user, _)| user.clone())
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<(), KeyOpsError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(KeyOpsError::Unavailable("memory key server is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyOps for MemoryKeyOps {
    async fn get_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        device: &CryptPublicKey,
    ) -> Result<TlfCryptKeyServerHalf, KeyOpsError> {
        self.enter(&self.get_tlf).await?;
        self.tlf_halves
            .lock()
            .get(&(tlf, version, device.kid()))
            .map(|(_, half)| half.clone())
            .ok_or_else(|| KeyOpsError::NotFound(format!("{tlf} v{version} {}", device.kid())))
    }

    async fn put_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        user: &UserId,
        device: &CryptPublicKey,
        server_half: &TlfCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError> {
        self.enter(&self.put_tlf).await?;
        self.tlf_halves.lock().insert(
            (tlf, version, device.kid()),
            (user.clone(), server_half.clone()),
        );
        Ok(())
    }

    async fn get_block_crypt_key_server_half(
        &self,
        block: &BlockId,
    ) -> Result<BlockCryptKeyServerHalf, KeyOpsError> {
        self.enter(&self.get_block).await?;
        self.block_halves
            .lock()
            .get(block)
            .cloned()
            .ok_or_else(|| KeyOpsError::NotFound(format!("block {block}")))
    }

    async fn put_block_crypt_key_server_half(
        &self,
        block: &BlockId,
        server_half: &BlockCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError> {
        self.enter(&self.put_block).await?;
        let mut halves = self.block_halves.lock();
        match halves.get(block) {
            Some(existing) if existing == server_half => Ok(()),
            Some(_) => Err(KeyOpsError::Conflict(format!("block {block}"))),
            None => {
                halves.insert(*block, server_half.clone());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for MemoryKeyOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyOps")
            .field("calls", &self.calls())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlfk_crypto::CryptPrivateKey;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_tlf_half_put_get() {
        let ops = MemoryKeyOps::new();
        let tlf = TlfId::generate();
        let device = CryptPrivateKey::generate().public_key();
        let half = TlfCryptKeyServerHalf::generate();

        ops.put_tlf_crypt_key_server_half(tlf, KeyVersion::FIRST, &alice(), &device, &half)
            .await
            .unwrap();
        let got = ops
            .get_tlf_crypt_key_server_half(tlf, KeyVersion::FIRST, &device)
            .await
            .unwrap();
        assert_eq!(got, half);
        assert_eq!(ops.tlf_half_owner(tlf, KeyVersion::FIRST, &device), Some(alice()));

        // a retried rekey replaces the abandoned half
        let retry = TlfCryptKeyServerHalf::generate();
        ops.put_tlf_crypt_key_server_half(tlf, KeyVersion::FIRST, &alice(), &device, &retry)
            .await
            .unwrap();
        assert_eq!(
            ops.get_tlf_crypt_key_server_half(tlf, KeyVersion::FIRST, &device)
                .await
                .unwrap(),
            retry
        );
        assert_eq!(ops.tlf_half_count(), 1);

        let err = ops
            .get_tlf_crypt_key_server_half(tlf, KeyVersion::new(1), &device)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyOpsError::NotFound(_)));
        assert_eq!(
            ops.calls(),
            KeyOpsCalls {
                get_tlf: 3,
                put_tlf: 2,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_block_halves_are_write_once() {
        let ops = MemoryKeyOps::new();
        let block = BlockId::from_content(b"block");
        let half = BlockCryptKeyServerHalf::generate();

        ops.put_block_crypt_key_server_half(&block, &half).await.unwrap();
        // idempotent for the same value
        ops.put_block_crypt_key_server_half(&block, &half).await.unwrap();
        let err = ops
            .put_block_crypt_key_server_half(&block, &BlockCryptKeyServerHalf::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyOpsError::Conflict(_)));
        assert_eq!(ops.get_block_crypt_key_server_half(&block).await.unwrap(), half);
    }

    #[tokio::test]
    async fn test_offline_is_retryable() {
        let ops = MemoryKeyOps::new();
        ops.set_offline(true);
        let err = ops
            .get_block_crypt_key_server_half(&BlockId::from_content(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ops.calls().get_block, 1);
    }
}
