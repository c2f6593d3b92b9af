//! Directory-backed key server for single-host deployments and the CLI.
//!
//! Layout:
//!   `{root}/tlf/{tlf}/{version}/{kid}.json`
//!   `{root}/block/{hex[0..2]}/{hex}.json`  (two-level sharding)
//!
//! Each record is staged in its own temp file. Folder records are then
//! renamed over any earlier record; block records are hard-linked into
//! place, so they are write-once even with concurrent writers.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use zeroize::Zeroizing;

use tlfk_core::{BlockId, KeyVersion, TlfId, UserId};
use tlfk_crypto::{
    BlockCryptKeyServerHalf, CryptPublicKey, TlfCryptKeyServerHalf, KEY_SIZE,
};

use crate::ops::{KeyOps, KeyOpsError};

#[derive(Serialize, Deserialize)]
struct ServerHalfRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserId>,
    server_half: String,
    created_at: u64,
}

impl Drop for ServerHalfRecord {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.server_half);
    }
}

pub struct FsKeyOps {
    root: PathBuf,
}

impl FsKeyOps {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tlf_path(&self, tlf: TlfId, version: KeyVersion, device: &CryptPublicKey) -> PathBuf {
        self.root
            .join("tlf")
            .join(tlf.to_string())
            .join(version.to_string())
            .join(format!("{}.json", device.kid()))
    }

    fn block_path(&self, block: &BlockId) -> PathBuf {
        let hex = block.to_hex();
        self.root
            .join("block")
            .join(&hex[..2])
            .join(format!("{hex}.json"))
    }

    async fn read_half(&self, path: &Path) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyOpsError> {
        let content = match fs::read(path).await {
            Ok(c) => Zeroizing::new(c),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyOpsError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let record: ServerHalfRecord = serde_json::from_slice(&content).map_err(|e| {
            KeyOpsError::Other(anyhow::anyhow!(
                "parsing server half record {}: {e}",
                path.display()
            ))
        })?;
        decode_half(&record.server_half).map_err(|e| {
            KeyOpsError::Other(anyhow::anyhow!("{}: {e}", path.display()))
        })
    }

    /// Store `half` at `path` unless a record exists. An existing record with
    /// the same value is accepted; a different value is a conflict.
    ///
    /// The record is published with a hard link, which fails if `path`
    /// exists, so concurrent writers cannot both win.
    async fn write_half_once(&self, path: &Path, half: &[u8; KEY_SIZE]) -> Result<(), KeyOpsError> {
        let tmp = self.stage_record(path, None, half).await?;
        let linked = fs::hard_link(&tmp, path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "stored server half");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = self.read_half(path).await?;
                if *existing == *half {
                    Ok(())
                } else {
                    Err(KeyOpsError::Conflict(path.display().to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `half` at `path`, replacing any existing record.
    async fn write_half(
        &self,
        path: &Path,
        user: Option<&UserId>,
        half: &[u8; KEY_SIZE],
    ) -> Result<(), KeyOpsError> {
        let tmp = self.stage_record(path, user, half).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), "stored server half");
        Ok(())
    }

    /// Write a record to a temp file of its own next to `path`.
    async fn stage_record(
        &self,
        path: &Path,
        user: Option<&UserId>,
        half: &[u8; KEY_SIZE],
    ) -> Result<PathBuf, KeyOpsError> {
        let record = ServerHalfRecord {
            user: user.cloned(),
            server_half: BASE64.encode(half),
            created_at: unix_now(),
        };
        let json = Zeroizing::new(
            serde_json::to_vec_pretty(&record)
                .map_err(|e| KeyOpsError::Other(anyhow::anyhow!("serializing record: {e}")))?,
        );

        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).await?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &json[..]).await?;
        if let Err(e) = restrict_permissions(&tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(tmp)
    }
}

fn decode_half(encoded: &str) -> anyhow::Result<Zeroizing<[u8; KEY_SIZE]>> {
    let bytes = Zeroizing::new(BASE64.decode(encoded.as_bytes())?);
    if bytes.len() != KEY_SIZE {
        anyhow::bail!("server half is {} bytes, expected {KEY_SIZE}", bytes.len());
    }
    let mut half = Zeroizing::new([0u8; KEY_SIZE]);
    half.copy_from_slice(&bytes);
    Ok(half)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl KeyOps for FsKeyOps {
    async fn get_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        device: &CryptPublicKey,
    ) -> Result<TlfCryptKeyServerHalf, KeyOpsError> {
        let half = self.read_half(&self.tlf_path(tlf, version, device)).await?;
        Ok(TlfCryptKeyServerHalf::from_bytes(*half))
    }

    async fn put_tlf_crypt_key_server_half(
        &self,
        tlf: TlfId,
        version: KeyVersion,
        user: &UserId,
        device: &CryptPublicKey,
        server_half: &TlfCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError> {
        let path = self.tlf_path(tlf, version, device);
        self.write_half(&path, Some(user), server_half.as_bytes())
            .await
    }

    async fn get_block_crypt_key_server_half(
        &self,
        block: &BlockId,
    ) -> Result<BlockCryptKeyServerHalf, KeyOpsError> {
        let half = self.read_half(&self.block_path(block)).await?;
        Ok(BlockCryptKeyServerHalf::from_bytes(*half))
    }

    async fn put_block_crypt_key_server_half(
        &self,
        block: &BlockId,
        server_half: &BlockCryptKeyServerHalf,
    ) -> Result<(), KeyOpsError> {
        let path = self.block_path(block);
        self.write_half_once(&path, server_half.as_bytes()).await
    }
}

impl std::fmt::Debug for FsKeyOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsKeyOps").field("root", &self.root).finish()
    }
}
