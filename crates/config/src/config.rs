//! Daemon configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// JSON parsing error in the settings document
    Json(serde_json::Error),
    /// A single time or season block failed validation
    InvalidBlock { name: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to parse settings: {}", e),
            ConfigError::InvalidBlock { name, reason } => {
                write!(f, "Invalid block '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// HTTP control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind (default 0.0.0.0)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on (default 1166)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1166
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Location of the persisted JSON documents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    /// Directory holding config.json, used_collections.json, user_exemptions.json
    /// and run_state.json
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

/// Media server connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaServerConfig {
    /// Base URL of the Plex server
    #[serde(default = "default_media_url")]
    pub url: String,
    /// X-Plex-Token used for every request
    #[serde(default)]
    pub token: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_media_url() -> String {
    "http://127.0.0.1:32400".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            url: default_media_url(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkersConfig {
    /// Libraries processed in parallel during a pass (0 = auto-derive)
    #[serde(default)]
    pub max_parallel_libraries: u32,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub media_server: MediaServerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - DYNAMIX_BIND -> server.bind
    /// - DYNAMIX_PORT -> server.port
    /// - DYNAMIX_STATE_DIR -> state.dir
    /// - PLEX_URL -> media_server.url
    /// - PLEX_TOKEN -> media_server.token
    /// - DYNAMIX_MAX_PARALLEL_LIBRARIES -> workers.max_parallel_libraries
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DYNAMIX_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("DYNAMIX_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("DYNAMIX_STATE_DIR") {
            if !val.trim().is_empty() {
                self.state.dir = PathBuf::from(val.trim());
            }
        }

        if let Ok(val) = env::var("PLEX_URL") {
            if !val.trim().is_empty() {
                self.media_server.url = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("PLEX_TOKEN") {
            self.media_server.token = val.trim().to_string();
        }

        if let Ok(val) = env::var("DYNAMIX_MAX_PARALLEL_LIBRARIES") {
            if let Ok(workers) = val.parse::<u32>() {
                self.workers.max_parallel_libraries = workers;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults plus env overrides.
    ///
    /// Container deployments usually configure everything through the environment.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load(path)
    }
}
