//! Configuration system for the `SkillChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/skillchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. The session credential is
//! never read from the file.

use std::path::PathBuf;
use std::time::Duration;

use skillchat_proto::message::{MAX_BODY_LEN, UserId};
use skillchat_proto::roster::RosterContext;

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

    /// A required setting has no value in any layer.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A URL setting does not parse.
    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// Parse failure.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    reconnect: ReconnectFileConfig,
    typing: TypingFileConfig,
    chat: ChatFileConfig,
    cache: CacheFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_base_url: Option<String>,
    live_url: Option<String>,
    user_id: Option<String>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    stability_threshold_secs: Option<u64>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    idle_timeout_ms: Option<u64>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_body_len: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[cache]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CacheFileConfig {
    dir: Option<PathBuf>,
    quota_bytes: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Backoff policy for the live channel supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first redial.
    pub initial_delay: Duration,
    /// Upper bound on the doubled delay.
    pub max_delay: Duration,
    /// Redial attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
    /// A link that stays up this long resets the attempt counter.
    pub stability_threshold: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            stability_threshold: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Delay before redial number `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }

    /// Whether `attempt` exceeds the configured limit.
    #[must_use]
    pub const fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// Engine tuning shared by the façade and its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum outgoing body length in characters.
    pub max_body_len: usize,
    /// Inactivity window after which a typing stop is emitted.
    pub typing_idle_timeout: Duration,
    /// Capacity of the live event broadcast channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_body_len: MAX_BODY_LEN,
            typing_idle_timeout: Duration::from_secs(2),
            event_buffer: 256,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// REST base URL, e.g. `https://lms.example.edu/api`.
    pub api_base_url: Option<String>,
    /// Live-channel WebSocket URL.
    pub live_url: Option<String>,
    /// Current user's id.
    pub user_id: Option<String>,
    /// Bearer credential (CLI / env only).
    pub token: Option<String>,
    /// Initial roster context.
    pub context: RosterContext,

    // -- Live channel --
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,

    // -- Engine --
    /// Engine tuning.
    pub engine: EngineConfig,

    // -- Cache --
    /// Cache directory; `None` selects the platform default.
    pub cache_dir: Option<PathBuf>,
    /// Byte quota for the cache directory; `None` is unbounded.
    pub cache_quota: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            live_url: None,
            user_id: None,
            token: None,
            context: RosterContext::all(),
            reconnect: ReconnectConfig::default(),
            engine: EngineConfig::default(),
            cache_dir: None,
            cache_quota: None,
        }
    }
}

/// Settings required to talk to the backend, all present and parsed.
#[derive(Debug, Clone)]
pub struct ServerEndpoints {
    /// REST base URL.
    pub api_base_url: url::Url,
    /// Live-channel URL.
    pub live_url: url::Url,
    /// Current user.
    pub user_id: UserId,
    /// Bearer credential.
    pub token: String,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or the file cannot be parsed.
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
            api_base_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_base_url.clone()),
            live_url: cli.live_url.clone().or_else(|| file.server.live_url.clone()),
            user_id: cli.user_id.clone().or_else(|| file.server.user_id.clone()),
            token: cli.token.clone(),
            context: cli
                .context
                .as_deref()
                .map_or(defaults.context, RosterContext::new),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
                stability_threshold: file
                    .reconnect
                    .stability_threshold_secs
                    .map_or(defaults.reconnect.stability_threshold, Duration::from_secs),
            },
            engine: EngineConfig {
                max_body_len: file
                    .chat
                    .max_body_len
                    .unwrap_or(defaults.engine.max_body_len),
                typing_idle_timeout: file
                    .typing
                    .idle_timeout_ms
                    .map_or(defaults.engine.typing_idle_timeout, Duration::from_millis),
                event_buffer: file
                    .chat
                    .event_buffer
                    .unwrap_or(defaults.engine.event_buffer),
            },
            cache_dir: cli.cache_dir.clone().or_else(|| file.cache.dir.clone()),
            cache_quota: file.cache.quota_bytes,
        }
    }

    /// Collect and parse the backend settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for the first absent setting and
    /// [`ConfigError::InvalidUrl`] for an unparseable URL.
    pub fn endpoints(&self) -> Result<ServerEndpoints, ConfigError> {
        let api = self
            .api_base_url
            .as_deref()
            .ok_or(ConfigError::Missing("server.api_base_url"))?;
        let live = self
            .live_url
            .as_deref()
            .ok_or(ConfigError::Missing("server.live_url"))?;
        let user_id = self
            .user_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("server.user_id"))?;
        let token = self
            .token
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("token"))?;

        Ok(ServerEndpoints {
            api_base_url: url::Url::parse(api).map_err(|source| ConfigError::InvalidUrl {
                field: "server.api_base_url",
                source,
            })?,
            live_url: url::Url::parse(live).map_err(|source| ConfigError::InvalidUrl {
                field: "server.live_url",
                source,
            })?,
            user_id: UserId::new(user_id),
            token,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Headless SkillForge direct-messaging client")]
pub struct CliArgs {
    /// REST base URL of the LMS backend.
    #[arg(long, env = "SKILLCHAT_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the live channel.
    #[arg(long, env = "SKILLCHAT_LIVE_URL")]
    pub live_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "SKILLCHAT_USER")]
    pub user_id: Option<String>,

    /// Session bearer token.
    #[arg(long, env = "SKILLCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Roster context to load first (e.g. a class id).
    #[arg(long)]
    pub context: Option<String>,

    /// Path to config file (default: `~/.config/skillchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cache directory (default: platform cache dir).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SKILLCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/skillchat.log`).
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
    let path = config_dir.join("skillchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
