use std::net::SocketAddr;
use std::path::PathBuf;

use rollcall_core::DEFAULT_STATE_KEY;

/// Server configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Port key the application state is persisted under.
    pub state_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// ROLLCALL_DB_PATH defaults to "./rollcall.redb"
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = PathBuf::from(
            lookup("ROLLCALL_DB_PATH").unwrap_or_else(|| "./rollcall.redb".to_string()),
        );

        let listen_addr = lookup("ROLLCALL_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("ROLLCALL_LISTEN_ADDR", "must be a valid socket address")
            })?;

        let state_key = match lookup("ROLLCALL_STATE_KEY") {
            Some(key) if key.trim().is_empty() => {
                return Err(ConfigError::Missing("ROLLCALL_STATE_KEY"));
            }
            Some(key) => key,
            None => DEFAULT_STATE_KEY.to_string(),
        };

        Ok(Config {
            listen_addr,
            db_path,
            state_key,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} is set but empty", var),
            ConfigError::Invalid(var, msg) => write!(f, "Invalid value for {}: {}", var, msg),
        }
    }
}

impl std::error::Error for ConfigError {}
