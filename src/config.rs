use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::services::persistence::PersistenceSettings;
use crate::services::presence::PresenceTtls;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated. `*` or unset allows any origin.
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database URL. Without one, documents live in memory.
    pub db_url: Option<String>,

    /// Quiet period before a document's latest edit is written
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,

    #[serde(default = "default_persist_max_retries")]
    pub persist_max_retries: u32,

    #[serde(default = "default_persist_retry_base_ms")]
    pub persist_retry_base_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,

    #[serde(default = "default_cursor_ttl_secs")]
    pub cursor_ttl_secs: u64,

    #[serde(default = "default_active_user_ttl_secs")]
    pub active_user_ttl_secs: u64,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Maximum number of keys held by the in-memory store
    #[serde(default = "default_kv_max_capacity")]
    pub kv_max_capacity: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn persistence_settings(&self) -> PersistenceSettings {
        PersistenceSettings {
            debounce: Duration::from_millis(self.persist_debounce_ms),
            max_retries: self.persist_max_retries,
            retry_base: Duration::from_millis(self.persist_retry_base_ms),
        }
    }

    pub fn presence_ttls(&self) -> PresenceTtls {
        PresenceTtls {
            roster: Duration::from_secs(self.presence_ttl_secs),
            active_user: Duration::from_secs(self.active_user_ttl_secs),
            room_counter: Duration::from_secs(self.session_ttl_secs),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            db_url: None,
            persist_debounce_ms: default_persist_debounce_ms(),
            persist_max_retries: default_persist_max_retries(),
            persist_retry_base_ms: default_persist_retry_base_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            presence_ttl_secs: default_presence_ttl_secs(),
            cursor_ttl_secs: default_cursor_ttl_secs(),
            active_user_ttl_secs: default_active_user_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            kv_max_capacity: default_kv_max_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_persist_debounce_ms() -> u64 {
    500
}

fn default_persist_max_retries() -> u32 {
    3
}

fn default_persist_retry_base_ms() -> u64 {
    100
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_presence_ttl_secs() -> u64 {
    300
}

fn default_cursor_ttl_secs() -> u64 {
    30
}

fn default_active_user_ttl_secs() -> u64 {
    40
}

fn default_session_ttl_secs() -> u64 {
    300
}

fn default_kv_max_capacity() -> u64 {
    1_000_000
}
