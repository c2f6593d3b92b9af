//! Device directory: the enrolled devices of every known user.
//!
//! Each device has its own X25519 key pair; only the public half is
//! recorded here. Revoked devices stay in the directory but are excluded
//! from every subsequent rekey.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use tlfk_core::UserId;
use tlfk_crypto::CryptPublicKey;

/// An enrolled device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Human-readable device name, unique per user (e.g. "yoga-laptop")
    pub name: String,
    /// UUID v4 assigned at enrollment
    pub device_id: String,
    pub user: UserId,
    pub public_key: CryptPublicKey,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix timestamp of enrollment
    pub enrolled_at: u64,
    pub revoked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDirectory {
    pub devices: Vec<DeviceRecord>,
}

impl DeviceDirectory {
    /// Load the directory from a JSON file; a missing file is an empty directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading device directory: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing device directory: {}", path.display()))
    }

    /// Save the directory as JSON, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
        let json = serde_json::to_string_pretty(self).context("serializing device directory")?;
        let tmp_path = parent.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing device directory: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("replacing device directory: {}", path.display()))
    }

    /// Enroll a device for `user` and return its generated device id.
    ///
    /// Fails if the user already has a device with this name, or if the
    /// public key is enrolled anywhere already.
    pub fn enroll(
        &mut self,
        user: &UserId,
        name: &str,
        public_key: CryptPublicKey,
        description: Option<String>,
    ) -> Result<String> {
        if self.find(user, name).is_some() {
            bail!("user {user} already has a device named {name:?}");
        }
        if let Some(existing) = self.devices.iter().find(|d| d.public_key == public_key) {
            bail!(
                "public key {} is already enrolled as {}/{}",
                public_key.kid(),
                existing.user,
                existing.name
            );
        }

        let device_id = uuid::Uuid::new_v4().to_string();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.devices.push(DeviceRecord {
            name: name.to_string(),
            device_id: device_id.clone(),
            user: user.clone(),
            public_key,
            description,
            enrolled_at: now,
            revoked: false,
        });
        Ok(device_id)
    }

    /// Revoke a device by name. Returns `false` if no such device exists.
    pub fn revoke(&mut self, user: &UserId, name: &str) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|d| &d.user == user && d.name == name)
        {
            Some(device) => {
                device.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, user: &UserId, name: &str) -> Option<&DeviceRecord> {
        self.devices
            .iter()
            .find(|d| &d.user == user && d.name == name)
    }

    pub fn find_by_key(&self, public_key: &CryptPublicKey) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| &d.public_key == public_key)
    }

    /// Every user with at least one enrolled device, revoked or not.
    pub fn users(&self) -> BTreeSet<UserId> {
        self.devices.iter().map(|d| d.user.clone()).collect()
    }

    pub fn devices_of<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a DeviceRecord> {
        self.devices.iter().filter(move |d| &d.user == user)
    }

    /// Public keys of the user's non-revoked devices, or `None` if the user
    /// has never enrolled a device.
    pub fn active_keys(&self, user: &UserId) -> Option<BTreeSet<CryptPublicKey>> {
        let mut known = false;
        let mut keys = BTreeSet::new();
        for device in self.devices_of(user) {
            known = true;
            if !device.revoked {
                keys.insert(device.public_key);
            }
        }
        known.then_some(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlfk_crypto::CryptPrivateKey;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn key() -> CryptPublicKey {
        CryptPrivateKey::generate().public_key()
    }

    #[test]
    fn test_enroll_and_find() {
        let mut dir = DeviceDirectory::default();
        let laptop = key();
        let id = dir.enroll(&user("alice"), "laptop", laptop, None).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let found = dir.find(&user("alice"), "laptop").unwrap();
        assert_eq!(found.public_key, laptop);
        assert!(!found.revoked);
        assert!(dir.find(&user("bob"), "laptop").is_none());
        assert_eq!(dir.find_by_key(&laptop).unwrap().name, "laptop");
    }

    #[test]
    fn test_enroll_rejects_duplicates() {
        let mut dir = DeviceDirectory::default();
        let k = key();
        dir.enroll(&user("alice"), "laptop", k, None).unwrap();
        assert!(dir.enroll(&user("alice"), "laptop", key(), None).is_err());
        assert!(dir.enroll(&user("bob"), "desktop", k, None).is_err());
        // same name for another user is fine
        dir.enroll(&user("bob"), "laptop", key(), None).unwrap();
        assert_eq!(dir.users().len(), 2);
    }

    #[test]
    fn test_revoke_excludes_from_active_keys() {
        let mut dir = DeviceDirectory::default();
        let laptop = key();
        let phone = key();
        dir.enroll(&user("alice"), "laptop", laptop, None).unwrap();
        dir.enroll(&user("alice"), "phone", phone, None).unwrap();

        assert!(dir.revoke(&user("alice"), "phone"));
        assert!(!dir.revoke(&user("alice"), "tablet"));

        let active = dir.active_keys(&user("alice")).unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains(&laptop));

        dir.revoke(&user("alice"), "laptop");
        assert_eq!(dir.active_keys(&user("alice")), Some(BTreeSet::new()));
        assert_eq!(dir.active_keys(&user("carol")), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("devices.json");

        let mut dir = DeviceDirectory::default();
        dir.enroll(&user("alice"), "laptop", key(), Some("work".into()))
            .unwrap();
        dir.save(&path).unwrap();

        let loaded = DeviceDirectory::load(&path).unwrap();
        assert_eq!(loaded, dir);
    }

    #[test]
    fn test_save_replaces_previous_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("devices.json");

        let mut dir = DeviceDirectory::default();
        dir.enroll(&user("alice"), "laptop", key(), None).unwrap();
        dir.save(&path).unwrap();
        dir.revoke(&user("alice"), "laptop");
        dir.enroll(&user("alice"), "phone", key(), None).unwrap();
        dir.save(&path).unwrap();

        assert_eq!(DeviceDirectory::load(&path).unwrap(), dir);
        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("devices.json")]);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeviceDirectory::load(&tmp.path().join("missing.json")).unwrap();
        assert!(dir.devices.is_empty());
    }
}
