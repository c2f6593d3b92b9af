//! Process-local key cache.
//!
//! Maps (folder, key version) to folder keys and block ids to block keys.
//! Entries are insert-once: a put for a key that is already resident keeps
//! the resident value and returns it, so concurrent derivations of the same
//! key converge on one value.

use parking_lot::RwLock;
use std::collections::HashMap;

use tlfk_core::{BlockId, KeyVersion, TlfId};
use tlfk_crypto::{BlockCryptKey, TlfCryptKey};

/// Key cache used by the key manager. Implementations must be safe for
/// concurrent use.
pub trait KeyCache: Send + Sync {
    fn get_tlf_crypt_key(&self, tlf: &TlfId, version: KeyVersion) -> Option<TlfCryptKey>;

    /// Insert `key` unless an entry exists; returns the resident key.
    fn put_tlf_crypt_key(&self, tlf: TlfId, version: KeyVersion, key: TlfCryptKey) -> TlfCryptKey;

    fn get_block_crypt_key(&self, block: &BlockId) -> Option<BlockCryptKey>;

    /// Insert `key` unless an entry exists; returns the resident key.
    fn put_block_crypt_key(&self, block: BlockId, key: BlockCryptKey) -> BlockCryptKey;
}

/// Unbounded in-memory cache. Keys are zeroized when the cache is dropped.
#[derive(Default)]
pub struct MemoryKeyCache {
    tlf_keys: RwLock<HashMap<(TlfId, KeyVersion), TlfCryptKey>>,
    block_keys: RwLock<HashMap<BlockId, BlockCryptKey>>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached (folder keys, block keys).
    pub fn len(&self) -> (usize, usize) {
        (self.tlf_keys.read().len(), self.block_keys.read().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}

impl KeyCache for MemoryKeyCache {
    fn get_tlf_crypt_key(&self, tlf: &TlfId, version: KeyVersion) -> Option<TlfCryptKey> {
        self.tlf_keys.read().get(&(*tlf, version)).cloned()
    }

    fn put_tlf_crypt_key(&self, tlf: TlfId, version: KeyVersion, key: TlfCryptKey) -> TlfCryptKey {
        self.tlf_keys
            .write()
            .entry((tlf, version))
            .or_insert(key)
            .clone()
    }

    fn get_block_crypt_key(&self, block: &BlockId) -> Option<BlockCryptKey> {
        self.block_keys.read().get(block).cloned()
    }

    fn put_block_crypt_key(&self, block: BlockId, key: BlockCryptKey) -> BlockCryptKey {
        self.block_keys.write().entry(block).or_insert(key).clone()
    }
}

impl std::fmt::Debug for MemoryKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (tlf_keys, block_keys) = self.len();
        f.debug_struct("MemoryKeyCache")
            .field("tlf_keys", &tlf_keys)
            .field("block_keys", &block_keys)
            .finish()
    }
}
