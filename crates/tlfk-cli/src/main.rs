//! tlfk: folder key management CLI
//!
//! Commands:
//!   device enroll <name>           - generate this device's key pair and enroll it
//!   device list                    - list enrolled devices
//!   device revoke <name>           - revoke a device (excluded from later rekeys)
//!   folder create --writers a,b    - create metadata for a new, unkeyed folder
//!   rekey <folder>                 - create the next key generation of a folder
//!   check <folder> [--version N]   - derive a folder key and print its fingerprint
//!   inspect <folder>               - show key versions and bundle entries
//!   config show                    - display current configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tlfk_core::config::{expand_tilde, TlfkConfig};
use tlfk_core::{FolderHandle, KeyVersion, Path as FolderPath, TlfId, UserId};
use tlfk_crypto::{CryptPrivateKey, StandardCrypto};
use tlfk_keyman::{
    DeviceDirectory, FolderKeyMetadata, FsKeyOps, KeyManager, LocalIdentity, MemoryKeyCache,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tlfk",
    version,
    about = "tlfk folder key management",
    long_about = "tlfk: enroll devices, create and rekey folders, and check folder keys"
)]
struct Cli {
    /// Path to tlfk.toml configuration file
    #[arg(long, short = 'c', env = "TLFK_CONFIG", default_value = "~/.config/tlfk/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "TLFK_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "TLFK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Act as this user instead of `identity.user`
    #[arg(long, short = 'u', env = "TLFK_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Device enrollment and revocation
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Folder metadata management
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Create the next key generation of a folder for every active device
    Rekey {
        /// Folder id
        folder: TlfId,
    },

    /// Derive a folder key on this device and print its fingerprint
    Check {
        /// Folder id
        folder: TlfId,
        /// Key version (default: latest)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Show key versions and bundle entries of a folder
    Inspect {
        /// Folder id
        folder: TlfId,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Generate this device's key pair and enroll it
    Enroll {
        /// Device name, unique per user (e.g. "yoga-laptop")
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List enrolled devices
    List,
    /// Revoke one of the current user's devices
    Revoke { name: String },
}

#[derive(Subcommand, Debug)]
enum FolderAction {
    /// Create metadata for a new folder (keyed by the first rekey)
    Create {
        #[arg(long, value_delimiter = ',', required = true)]
        writers: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        readers: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let loaded = TlfkConfig::load_optional(&config_path)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let defaulted = loaded.is_none();
    let config = loaded.unwrap_or_default();

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    if defaulted {
        warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    let ctx = Session::new(config, cli.user.clone());
    match cli.command {
        Commands::Device { action } => match action {
            DeviceAction::Enroll { name, description } => {
                cmd_device_enroll(&ctx, &name, description)
            }
            DeviceAction::List => cmd_device_list(&ctx),
            DeviceAction::Revoke { name } => cmd_device_revoke(&ctx, &name),
        },
        Commands::Folder { action } => match action {
            FolderAction::Create { writers, readers } => {
                cmd_folder_create(&ctx, &writers, &readers)
            }
        },
        Commands::Rekey { folder } => cmd_rekey(&ctx, folder).await,
        Commands::Check { folder, version } => cmd_check(&ctx, folder, version).await,
        Commands::Inspect { folder } => cmd_inspect(&ctx, folder),
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&ctx.config),
        },
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("TLFK_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    // logs go to stderr so command output stays clean
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Paths and collaborators ────────────────────────────────────────────────────

/// Resolved configuration plus the user override.
struct Session {
    config: TlfkConfig,
    user: Option<String>,
}

impl Session {
    fn new(config: TlfkConfig, user: Option<String>) -> Self {
        Self { config, user }
    }

    fn user(&self) -> Result<UserId> {
        let name = self
            .user
            .as_deref()
            .or(self.config.identity.user.as_deref())
            .context("no user configured: set identity.user or pass --user")?;
        Ok(UserId::new(name)?)
    }

    fn device_key_file(&self) -> PathBuf {
        expand_tilde(
            self.config
                .identity
                .device_key_file
                .as_deref()
                .unwrap_or(Path::new("~/.config/tlfk/device.key")),
        )
    }

    fn directory_file(&self) -> PathBuf {
        expand_tilde(
            self.config
                .identity
                .directory_file
                .as_deref()
                .unwrap_or(Path::new("~/.config/tlfk/devices.json")),
        )
    }

    fn folder_file(&self, folder: TlfId) -> PathBuf {
        expand_tilde(&self.config.metadata.dir).join(format!("{folder}.json"))
    }

    fn load_folder(&self, folder: TlfId) -> Result<FolderKeyMetadata> {
        let path = self.folder_file(folder);
        if !path.exists() {
            bail!("unknown folder {folder} (no metadata at {})", path.display());
        }
        FolderKeyMetadata::load(&path)
    }

    fn load_device_key(&self) -> Result<Option<CryptPrivateKey>> {
        let path = self.device_key_file();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading device key: {}", path.display()))?;
        let key = CryptPrivateKey::from_hex(&content)
            .with_context(|| format!("parsing device key: {}", path.display()))?;
        Ok(Some(key))
    }

    fn key_manager(&self) -> Result<KeyManager> {
        let user = self.user()?;
        let directory = DeviceDirectory::load(&self.directory_file())?;
        let (crypto, identity) = match self.load_device_key()? {
            Some(key) => {
                let public = key.public_key();
                (
                    StandardCrypto::new(key),
                    LocalIdentity::new(user, public, directory),
                )
            }
            None => (
                StandardCrypto::without_device_key(),
                LocalIdentity::without_device(user, directory),
            ),
        };
        let ops = FsKeyOps::new(expand_tilde(&self.config.key_server.dir));

        Ok(KeyManager::new(
            Arc::new(MemoryKeyCache::new()),
            Arc::new(ops),
            Arc::new(crypto),
            Arc::new(identity),
        )
        .with_op_timeout(self.config.keys.op_timeout()))
    }
}

fn parse_users(names: &[String]) -> Result<Vec<UserId>> {
    names
        .iter()
        .map(|n| UserId::new(n.trim()).map_err(anyhow::Error::from))
        .collect()
}

/// Write a private key file readable only by the owner.
fn write_key_file(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("creating device key: {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("writing device key: {}", path.display()))
}

// ── Commands ───────────────────────────────────────────────────────────────────

fn cmd_device_enroll(ctx: &Session, name: &str, description: Option<String>) -> Result<()> {
    let user = ctx.user()?;
    let key_path = ctx.device_key_file();
    if key_path.exists() {
        bail!(
            "device key already exists at {}; remove it first to enroll a new key",
            key_path.display()
        );
    }

    let dir_path = ctx.directory_file();
    let mut directory = DeviceDirectory::load(&dir_path)?;
    let key = CryptPrivateKey::generate();
    let public = key.public_key();
    let device_id = directory.enroll(&user, name, public, description)?;

    write_key_file(&key_path, &key.to_hex())?;
    directory.save(&dir_path)?;

    info!(%user, device = name, kid = %public.kid(), "device enrolled");
    println!("Enrolled device {name} for {user}");
    println!("  device id: {device_id}");
    println!("  kid:       {}", public.kid());
    println!("  key file:  {}", key_path.display());
    Ok(())
}

fn cmd_device_list(ctx: &Session) -> Result<()> {
    let directory = DeviceDirectory::load(&ctx.directory_file())?;
    if directory.devices.is_empty() {
        println!("No devices enrolled");
        return Ok(());
    }
    println!("{:<16} {:<20} {:<10} KID", "USER", "NAME", "STATUS");
    for device in &directory.devices {
        let status = if device.revoked { "revoked" } else { "active" };
        println!(
            "{:<16} {:<20} {:<10} {}",
            device.user,
            device.name,
            status,
            device.public_key.kid()
        );
    }
    Ok(())
}

fn cmd_device_revoke(ctx: &Session, name: &str) -> Result<()> {
    let user = ctx.user()?;
    let path = ctx.directory_file();
    let mut directory = DeviceDirectory::load(&path)?;
    if !directory.revoke(&user, name) {
        bail!("user {user} has no device named {name:?}");
    }
    directory.save(&path)?;
    info!(%user, device = name, "device revoked");
    println!("Revoked {user}/{name}; rekey shared folders to cut it off from new data");
    Ok(())
}

fn cmd_folder_create(ctx: &Session, writers: &[String], readers: &[String]) -> Result<()> {
    let handle = FolderHandle::new(parse_users(writers)?, parse_users(readers)?);
    let md = FolderKeyMetadata::new(TlfId::generate(), handle);
    let path = ctx.folder_file(md.id);
    md.save(&path)?;
    println!("Created folder {} ({})", md.id, md.display_name());
    println!("Run `tlfk rekey {}` to create its first key", md.id);
    Ok(())
}

async fn cmd_rekey(ctx: &Session, folder: TlfId) -> Result<()> {
    let mut md = ctx.load_folder(folder)?;
    let manager = ctx.key_manager()?;
    let version = manager.rekey(&mut md).await?;
    md.save(&ctx.folder_file(folder))?;

    let devices = md.bundle(version).map_or(0, |b| b.device_count());
    println!(
        "Rekeyed {} to key version {version} ({devices} devices)",
        md.display_name()
    );
    Ok(())
}

async fn cmd_check(ctx: &Session, folder: TlfId, version: Option<u32>) -> Result<()> {
    let md = ctx.load_folder(folder)?;
    let manager = ctx.key_manager()?;
    let path = FolderPath::new(md.id, vec![]);
    let (version, key) = match version {
        Some(v) => {
            let v = KeyVersion::new(v);
            (v, manager.get_tlf_crypt_key_at_version(&path, &md, v).await?)
        }
        None => {
            let key = manager.get_tlf_crypt_key(&path, &md).await?;
            let latest = md.latest_key_version().unwrap_or_default();
            (latest, key)
        }
    };
    println!(
        "{} key version {version}: fingerprint {}",
        md.display_name(),
        key.fingerprint()
    );
    Ok(())
}

fn cmd_inspect(ctx: &Session, folder: TlfId) -> Result<()> {
    let md = ctx.load_folder(folder)?;
    println!("folder:   {}", md.id);
    println!("handle:   {}", md.display_name());
    match md.latest_key_version() {
        Some(latest) => println!("latest:   {latest}"),
        None => println!("latest:   (not keyed)"),
    }
    for (version, bundle) in md.key_bundles().iter().enumerate() {
        let users: Vec<String> = bundle
            .client_halves
            .iter()
            .map(|(user, devices)| format!("{user}:{}", devices.len()))
            .collect();
        println!(
            "  v{version}: {} devices [{}]",
            bundle.device_count(),
            users.join(", ")
        );
    }
    Ok(())
}

fn cmd_config_show(config: &TlfkConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("serializing config")?;
    print!("{rendered}");
    Ok(())
}
