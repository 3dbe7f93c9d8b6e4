use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration for the sync core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP base URL for the draft API (e.g. "http://localhost:8080")
    pub server_url: String,
    /// WebSocket base URL for the patch stream (e.g. "ws://localhost:8080")
    pub stream_url: String,
    /// API key for authenticated deployments
    pub api_key: Option<String>,
    /// Autosave debounce quiet period in milliseconds
    pub autosave_debounce_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            stream_url: "ws://localhost:8080".to_string(),
            api_key: None,
            autosave_debounce_ms: 400,
        }
    }
}

impl ClientConfig {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from config file
        if let Some(path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
                config = serde_yaml::from_str(&contents)
                    .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
            }
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("ATTEMPT_SYNC_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(url) = std::env::var("ATTEMPT_SYNC_STREAM_URL") {
            config.stream_url = url;
        }
        if let Ok(key) = std::env::var("ATTEMPT_SYNC_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(ms) = std::env::var("ATTEMPT_SYNC_DEBOUNCE_MS") {
            config.autosave_debounce_ms = ms
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ATTEMPT_SYNC_DEBOUNCE_MS".to_string()))?;
        }

        Ok(config)
    }

    /// The autosave debounce as a duration.
    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name) => {
                write!(f, "Invalid value for '{}'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
