//! Configuration system for the `VibeTalk` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/vibetalk/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::composer::audio::DEFAULT_CHUNK_SIZE;
use crate::net::NetConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No backend URL was given anywhere.
    #[error("no server URL configured (use --server-url or VIBETALK_SERVER_URL)")]
    MissingServerUrl,

    /// The backend URL is malformed or not a WebSocket URL.
    #[error("invalid server URL {url}: {reason}")]
    InvalidServerUrl {
        /// The rejected value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    profile: ProfileFileConfig,
    audio: AudioFileConfig,
    ui: UiFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[profile]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ProfileFileConfig {
    name: Option<String>,
    avatar: Option<String>,
    photo: Option<PathBuf>,
}

/// `[audio]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AudioFileConfig {
    chunk_size: Option<usize>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Backend WebSocket URL.
    pub server_url: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Channel capacity for commands and inbound frames.
    pub channel_capacity: usize,
    /// Buffer size for the session event channel.
    pub event_buffer: usize,

    // -- Profile --
    /// Display name to log in with; prompted for when absent.
    pub display_name: Option<String>,
    /// Preset avatar (`3` or `avatar3.png`) or image data URI.
    pub avatar: Option<String>,
    /// Image file used as a custom avatar; wins over `avatar`.
    pub photo: Option<PathBuf>,

    // -- Audio --
    /// Chunk size for streamed audio files.
    pub chunk_size: usize,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            event_buffer: 64,
            display_name: None,
            avatar: None,
            photo: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/vibetalk/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.network.server_url.clone()),
            connect_timeout: cli
                .connect_timeout_secs
                .or(file.network.connect_timeout_secs)
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            event_buffer: file.network.event_buffer.unwrap_or(defaults.event_buffer),
            display_name: cli.name.clone().or_else(|| file.profile.name.clone()),
            avatar: cli.avatar.clone().or_else(|| file.profile.avatar.clone()),
            photo: cli.photo.clone().or_else(|| file.profile.photo.clone()),
            chunk_size: file.audio.chunk_size.unwrap_or(defaults.chunk_size),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Build a [`NetConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingServerUrl`] when no URL is configured and
    /// [`ConfigError::InvalidServerUrl`] unless it parses as `ws://` or
    /// `wss://`.
    pub fn to_net_config(&self) -> Result<NetConfig, ConfigError> {
        let raw = self
            .server_url
            .as_deref()
            .ok_or(ConfigError::MissingServerUrl)?;
        let endpoint = validate_server_url(raw)?;

        let mut net = NetConfig::new(endpoint.into());
        net.connect_timeout = self.connect_timeout;
        net.channel_capacity = self.channel_capacity;
        net.event_buffer = self.event_buffer;
        net.chunk_size = self.chunk_size;
        Ok(net)
    }
}

/// Check that `raw` is a WebSocket URL.
fn validate_server_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidServerUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("scheme must be ws or wss, not {other}"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for the VibeTalk chat backend")]
pub struct CliArgs {
    /// WebSocket URL of the chat backend.
    #[arg(long, env = "VIBETALK_SERVER_URL")]
    pub server_url: Option<String>,

    /// Display name to log in with.
    #[arg(long, env = "VIBETALK_NAME")]
    pub name: Option<String>,

    /// Preset avatar number (1-10) or `avatarN.png`.
    #[arg(long, env = "VIBETALK_AVATAR")]
    pub avatar: Option<String>,

    /// Image file to use as a custom avatar.
    #[arg(long)]
    pub photo: Option<PathBuf>,

    /// Seconds to wait for the WebSocket handshake.
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Path to config file (default: `~/.config/vibetalk/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "VIBETALK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/vibetalk.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("vibetalk").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
