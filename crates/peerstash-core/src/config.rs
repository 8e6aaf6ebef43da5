//! Configuration system for peerstash.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PEERSTASH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/peerstash/config.toml
//!   3. ~/.config/peerstash/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ids::PeerId;
use crate::wire::{Version, DEFAULT_CHUNK_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerstashConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Integer id of this peer. Must be unique in the population.
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 address of the interface used for multicast. 0.0.0.0 = default route.
    pub interface: Ipv4Addr,
    /// Header-only traffic.
    pub control_group: SocketAddrV4,
    /// PUTCHUNK traffic.
    pub data_group: SocketAddrV4,
    /// CHUNK traffic.
    pub recovery_group: SocketAddrV4,
    pub multicast_ttl: u32,
    /// Receive our own datagrams. Required for self-bookkeeping.
    pub loopback: bool,
    /// Host every peer's direct-path listener is reachable on.
    pub direct_host: IpAddr,
    /// Peer N listens on direct_base_port + N * direct_port_stride.
    pub direct_base_port: u16,
    pub direct_port_stride: u16,
    /// Local HTTP control plane port.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Chunk root. Unset = $XDG_DATA_HOME/peerstash/peer<id>.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Where restored files are written. Unset = <root>/restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_dir: Option<PathBuf>,
    /// Local quota, e.g. "64m" or "1g" (decimal multipliers).
    pub capacity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub version: Version,
    pub chunk_size: usize,
    /// Max PUTCHUNKs in flight per backup job.
    pub window_size: usize,
    /// Resends after the first PUTCHUNK.
    pub backup_retries: u32,
    /// First confirmation timeout; doubles per retry.
    pub base_timeout_ms: u64,
    /// Upper bound of the random delay before reacting to a peer.
    pub response_jitter_ms: u64,
    pub restore_interval_ms: u64,
    pub restore_max_rounds: u32,
    pub direct_retry_delay_ms: u64,
    pub delete_repeats: u32,
    /// GET_DELETED attempts per stored file at startup.
    pub validate_attempts: u32,
    pub validate_delay_ms: u64,
    pub ignore_ttl_ms: u64,
    pub persist_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { peer_id: 1 }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            control_group: SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 1), 8001),
            data_group: SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 2), 8002),
            recovery_group: SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 3), 8003),
            multicast_ttl: 1,
            loopback: true,
            direct_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            direct_base_port: 9000,
            direct_port_stride: 1,
            api_port: 9100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            restore_dir: None,
            capacity: "64m".to_string(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: Version::V1_0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_size: 10,
            backup_retries: 5,
            base_timeout_ms: 1000,
            response_jitter_ms: 400,
            restore_interval_ms: 400,
            restore_max_rounds: 50,
            direct_retry_delay_ms: 100,
            delete_repeats: 3,
            validate_attempts: 3,
            validate_delay_ms: 1000,
            ignore_ttl_ms: 1500,
            persist_interval_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn root_for(&self, peer_id: PeerId) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| data_dir().join(format!("peer{peer_id}")))
    }

    pub fn restore_dir_for(&self, peer_id: PeerId) -> PathBuf {
        self.restore_dir
            .clone()
            .unwrap_or_else(|| self.root_for(peer_id).join("restored"))
    }

    pub fn capacity_bytes(&self) -> Result<u64, SizeParseError> {
        parse_size(&self.capacity)
    }
}

impl NetworkConfig {
    /// Direct-path listen port for a peer. None when it does not fit in a u16.
    pub fn direct_port(&self, peer_id: PeerId) -> Option<u16> {
        let offset = (peer_id as u64) * (self.direct_port_stride as u64);
        u16::try_from(self.direct_base_port as u64 + offset).ok()
    }
}

impl ProtocolConfig {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }

    pub fn restore_interval(&self) -> Duration {
        Duration::from_millis(self.restore_interval_ms)
    }

    pub fn direct_retry_delay(&self) -> Duration {
        Duration::from_millis(self.direct_retry_delay_ms)
    }

    pub fn validate_delay(&self) -> Duration {
        Duration::from_millis(self.validate_delay_ms)
    }

    pub fn ignore_ttl(&self) -> Duration {
        Duration::from_millis(self.ignore_ttl_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

// ── Sizes ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid size {0:?}: expected a number with optional k/m/g suffix")]
pub struct SizeParseError(pub String);

/// Parse "500", "64k", "10M", "2g". Multipliers are decimal.
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let trimmed = s.trim();
    let err = || SizeParseError(s.to_string());
    let last = trimmed.chars().last().ok_or_else(err)?;
    let (digits, multiplier) = match last.to_ascii_lowercase() {
        'k' => (&trimmed[..trimmed.len() - 1], 1_000),
        'm' => (&trimmed[..trimmed.len() - 1], 1_000_000),
        'g' => (&trimmed[..trimmed.len() - 1], 1_000_000_000),
        _ => (trimmed, 1),
    };
    let value: u64 = digits.trim().parse().map_err(|_| err())?;
    value.checked_mul(multiplier).ok_or_else(err)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("peerstash")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("peerstash")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PeerstashConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, or defaults if it does not exist. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PeerstashConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PEERSTASH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&PeerstashConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage
            .capacity_bytes()
            .map_err(|e| ConfigError::Invalid("storage.capacity", e.to_string()))?;
        if self.protocol.chunk_size == 0 {
            return Err(ConfigError::Invalid("protocol.chunk_size", "must be > 0".into()));
        }
        if self.protocol.window_size == 0 {
            return Err(ConfigError::Invalid("protocol.window_size", "must be > 0".into()));
        }
        if self.network.direct_port(self.identity.peer_id).is_none() {
            return Err(ConfigError::Invalid(
                "identity.peer_id",
                format!(
                    "direct port {} + {} * {} exceeds 65535",
                    self.network.direct_base_port,
                    self.identity.peer_id,
                    self.network.direct_port_stride
                ),
            ));
        }
        if self.protocol.persist_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "protocol.persist_interval_secs",
                "must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Apply PEERSTASH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PEERSTASH_IDENTITY__PEER_ID") {
            if let Ok(id) = v.parse() {
                self.identity.peer_id = id;
            }
        }
        if let Ok(v) = std::env::var("PEERSTASH_STORAGE__ROOT") {
            self.storage.root = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("PEERSTASH_STORAGE__CAPACITY") {
            self.storage.capacity = v;
        }
        if let Ok(v) = std::env::var("PEERSTASH_NETWORK__INTERFACE") {
            if let Ok(addr) = v.parse() {
                self.network.interface = addr;
            }
        }
        if let Ok(v) = std::env::var("PEERSTASH_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
    }
}
