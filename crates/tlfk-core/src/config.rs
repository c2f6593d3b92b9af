use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TlfkError, TlfkResult};

/// Top-level configuration (loaded from tlfk.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlfkConfig {
    pub logging: LoggingConfig,
    pub keys: KeysConfig,
    pub identity: IdentityConfig,
    pub key_server: KeyServerConfig,
    pub metadata: MetadataConfig,
}

impl TlfkConfig {
    /// Load configuration from `path`. Returns `None` when the file does not
    /// exist; the caller decides whether defaults are acceptable.
    pub fn load_optional(path: &Path) -> TlfkResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map(Some)
            .map_err(|e| TlfkError::Config(format!("parsing config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> TlfkResult<Self> {
        toml::from_str(content).map_err(|e| TlfkError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Key manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Upper bound for any single key server or identity call, in seconds
    pub op_timeout_secs: u64,
}

impl KeysConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

/// Local user and device identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// User this device belongs to
    pub user: Option<String>,
    /// File holding this device's X25519 private key (hex)
    pub device_key_file: Option<PathBuf>,
    /// Device directory JSON (users -> enrolled devices)
    pub directory_file: Option<PathBuf>,
}

/// Directory-backed key server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyServerConfig {
    /// Root directory for server-half records
    pub dir: PathBuf,
}

/// Folder key metadata storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Directory holding one `<folder-id>.json` per folder
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            op_timeout_secs: 30,
        }
    }
}

impl Default for KeyServerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/tlfk/keyserver"),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/tlfk/folders"),
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}
