//! Per-version key bundles and the folder key metadata that carries them.
//!
//! A bundle holds, for every (user, device) authorized at that key version,
//! the device's client half wrapped under the generation's ephemeral key.
//! Bundles are append-only: version `v` lives at index `v` and is never
//! rewritten once added.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use tlfk_core::{FolderHandle, KeyVersion, TlfId, UserId};
use tlfk_crypto::{Kid, TlfCryptKey, TlfEphemeralPublicKey, TlfPublicKey};

/// A client half wrapped to one device; serialized as base64.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WrappedClientHalf(Vec<u8>);

impl WrappedClientHalf {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for WrappedClientHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedClientHalf({} bytes)", self.0.len())
    }
}

impl TryFrom<String> for WrappedClientHalf {
    type Error = base64::DecodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        BASE64.decode(s.as_bytes()).map(Self)
    }
}

impl From<WrappedClientHalf> for String {
    fn from(w: WrappedClientHalf) -> Self {
        BASE64.encode(&w.0)
    }
}

/// Key material for one key version of a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    /// user -> device kid -> wrapped client half
    pub client_halves: BTreeMap<UserId, BTreeMap<Kid, WrappedClientHalf>>,
    pub tlf_public_key: TlfPublicKey,
    pub tlf_ephemeral_public_key: TlfEphemeralPublicKey,
    /// Hex of [`TlfCryptKey::key_check`] for this generation's key.
    pub key_check: String,
}

impl KeyBundle {
    pub fn new(
        tlf_public_key: TlfPublicKey,
        tlf_ephemeral_public_key: TlfEphemeralPublicKey,
        key: &TlfCryptKey,
    ) -> Self {
        Self {
            client_halves: BTreeMap::new(),
            tlf_public_key,
            tlf_ephemeral_public_key,
            key_check: hex::encode(key.key_check()),
        }
    }

    /// Record the wrapped half for a device. Returns `false` if the device
    /// already has an entry, which is left untouched.
    pub fn insert(&mut self, user: UserId, kid: Kid, wrapped: WrappedClientHalf) -> bool {
        let devices = self.client_halves.entry(user).or_default();
        if devices.contains_key(&kid) {
            return false;
        }
        devices.insert(kid, wrapped);
        true
    }

    pub fn entry(&self, user: &UserId, kid: &Kid) -> Option<&WrappedClientHalf> {
        self.client_halves.get(user).and_then(|d| d.get(kid))
    }

    /// Number of (user, device) entries.
    pub fn device_count(&self) -> usize {
        self.client_halves.values().map(BTreeMap::len).sum()
    }

    /// Whether `key` is the key this bundle was created for.
    pub fn verify_key_check(&self, key: &TlfCryptKey) -> bool {
        self.key_check == hex::encode(key.key_check())
    }
}

/// The key-related part of a folder's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderKeyMetadata {
    pub id: TlfId,
    pub handle: FolderHandle,
    #[serde(default)]
    key_bundles: Vec<KeyBundle>,
}

impl FolderKeyMetadata {
    /// Metadata for a folder that has not been keyed yet.
    pub fn new(id: TlfId, handle: FolderHandle) -> Self {
        Self {
            id,
            handle,
            key_bundles: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.handle.to_display_string()
    }

    /// Highest key version present, `None` before the first rekey.
    pub fn latest_key_version(&self) -> Option<KeyVersion> {
        let len = u32::try_from(self.key_bundles.len()).ok()?;
        len.checked_sub(1).map(KeyVersion::new)
    }

    /// Version the next rekey will create, `None` on overflow.
    pub fn next_key_version(&self) -> Option<KeyVersion> {
        match self.latest_key_version() {
            Some(latest) => latest.next(),
            None => Some(KeyVersion::FIRST),
        }
    }

    pub fn bundle(&self, version: KeyVersion) -> Option<&KeyBundle> {
        self.key_bundles.get(version.as_index())
    }

    pub fn key_bundles(&self) -> &[KeyBundle] {
        &self.key_bundles
    }

    /// Append the bundle for the next key version and return that version.
    pub fn add_key_bundle(&mut self, bundle: KeyBundle) -> Option<KeyVersion> {
        let version = self.next_key_version()?;
        self.key_bundles.push(bundle);
        Some(version)
    }

    /// Load folder metadata from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading folder metadata: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing folder metadata: {}", path.display()))
    }

    /// Save folder metadata as JSON, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
        let json = serde_json::to_string_pretty(self).context("serializing folder metadata")?;
        let tmp_path = parent.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing folder metadata: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("replacing folder metadata: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlfk_crypto::{CryptPrivateKey, TlfEphemeralPrivateKey, TlfPrivateKey};

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn bundle_for(key: &TlfCryptKey) -> KeyBundle {
        KeyBundle::new(
            TlfPrivateKey::generate().public_key(),
            TlfEphemeralPrivateKey::generate().public_key(),
            key,
        )
    }

    #[test]
    fn test_versions_follow_bundle_count() {
        let mut md = FolderKeyMetadata::new(
            TlfId::generate(),
            FolderHandle::new(vec![user("alice")], vec![]),
        );
        assert_eq!(md.latest_key_version(), None);
        assert_eq!(md.next_key_version(), Some(KeyVersion::FIRST));

        let v0 = md.add_key_bundle(bundle_for(&TlfCryptKey::generate()));
        assert_eq!(v0, Some(KeyVersion::new(0)));
        let v1 = md.add_key_bundle(bundle_for(&TlfCryptKey::generate()));
        assert_eq!(v1, Some(KeyVersion::new(1)));

        assert_eq!(md.latest_key_version(), Some(KeyVersion::new(1)));
        assert!(md.bundle(KeyVersion::new(0)).is_some());
        assert!(md.bundle(KeyVersion::new(2)).is_none());
    }

    #[test]
    fn test_bundle_entries_are_unique_per_device() {
        let key = TlfCryptKey::generate();
        let mut bundle = bundle_for(&key);
        let kid = CryptPrivateKey::generate().public_key().kid();

        assert!(bundle.insert(user("alice"), kid.clone(), WrappedClientHalf::new(vec![1; 72])));
        assert!(!bundle.insert(user("alice"), kid.clone(), WrappedClientHalf::new(vec![2; 72])));
        assert_eq!(bundle.device_count(), 1);
        assert_eq!(
            bundle.entry(&user("alice"), &kid).unwrap().as_bytes(),
            &[1u8; 72][..]
        );
        assert!(bundle.entry(&user("bob"), &kid).is_none());
    }

    #[test]
    fn test_key_check() {
        let key = TlfCryptKey::generate();
        let bundle = bundle_for(&key);
        assert!(bundle.verify_key_check(&key));
        assert!(!bundle.verify_key_check(&TlfCryptKey::generate()));
    }

    #[test]
    fn test_metadata_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folders").join("md.json");

        let key = TlfCryptKey::generate();
        let mut bundle = bundle_for(&key);
        bundle.insert(
            user("alice"),
            CryptPrivateKey::generate().public_key().kid(),
            WrappedClientHalf::new(vec![9; 72]),
        );
        let mut md = FolderKeyMetadata::new(
            TlfId::generate(),
            FolderHandle::new(vec![user("alice")], vec![user("bob")]),
        );
        md.add_key_bundle(bundle);
        md.save(&path).unwrap();

        let loaded = FolderKeyMetadata::load(&path).unwrap();
        assert_eq!(loaded, md);
        assert!(loaded.bundle(KeyVersion::FIRST).unwrap().verify_key_check(&key));
        assert!(!dir.path().join("folders").join(".md.json.tmp").exists());
    }

    #[test]
    fn test_wrapped_half_debug_hides_bytes() {
        let w = WrappedClientHalf::new(vec![0xAB; 72]);
        assert_eq!(format!("{w:?}"), "WrappedClientHalf(72 bytes)");
    }
}
