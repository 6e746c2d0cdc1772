//! Server configuration.
//!
//! Loaded from environment variables with fallback to defaults.

use std::env;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub port: u16,

    /// SQLite connection string.
    pub database_url: String,

    /// Base URL of the external company registry.
    pub registry_base_url: String,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            port: env::var("KASA_SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("KASA_SERVER_PORT".to_string()))?,

            database_url: env::var("KASA_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://kasa.db?mode=rwc".to_string()),

            registry_base_url: env::var("KASA_REGISTRY_URL").unwrap_or_else(|_| {
                "https://ares.gov.cz/ekonomicke-subjekty-v-be/rest/ekonomicke-subjekty".to_string()
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Not all env vars may be absent under `cargo test`, so only check
        // the parse path doesn't explode.
        let config = ServerConfig::load().unwrap();
        assert!(!config.database_url.is_empty());
        assert!(!config.registry_base_url.is_empty());
    }
}
