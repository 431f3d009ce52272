//! Configuration system for the `tchat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:9090/api";

/// Default realtime WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:9090";

/// Name of the data directory under the user's home.
const DATA_DIR_NAME: &str = ".terminal-chat";

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

    /// No data directory was configured and no home directory is known.
    #[error("could not determine data directory (set --data-dir or HOME)")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    storage: StorageFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL.
    pub api_url: String,
    /// Realtime WebSocket URL.
    pub ws_url: String,
    /// Timeout applied to each REST request.
    pub request_timeout: Duration,
    /// Directory holding the keypair and the session file.
    /// `None` when neither configured nor derivable from `$HOME`.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            data_dir: dirs::home_dir().map(|home| home.join(DATA_DIR_NAME)),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.server.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .or(defaults.data_dir),
        }
    }

    /// The data directory, or an error if none could be determined.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] when unset.
    pub fn require_data_dir(&self) -> Result<&std::path::Path, ConfigError> {
        self.data_dir.as_deref().ok_or(ConfigError::NoDataDir)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal chat with end-to-end encrypted messages")]
pub struct CliArgs {
    /// REST base URL of the chat server.
    #[arg(long, env = "TCHAT_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the chat server.
    #[arg(long, env = "TCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Directory for the keypair and session (default: `~/.terminal-chat`).
    #[arg(long, env = "TCHAT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/tchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `tchat` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an account.
    Register {
        /// Desired login name.
        #[arg(long)]
        username: String,
        /// Contact email.
        #[arg(long)]
        email: String,
    },
    /// Log in and remember the session.
    Login {
        /// Login name.
        #[arg(long)]
        username: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the logged-in user and key fingerprint.
    Whoami,
    /// List conversations with unread counts.
    Chats {
        /// Keep running and report new unread messages as they arrive.
        #[arg(long)]
        watch: bool,
    },
    /// Find users by name.
    Search {
        /// Name or name prefix to search for.
        username: String,
    },
    /// Open a conversation.
    Chat {
        /// User id of the contact.
        contact_id: String,
    },
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
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available, use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("tchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
