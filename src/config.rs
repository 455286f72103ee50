//! Non-secret tunables layered the way the `config` crate is meant to be
//! used: built-in defaults, then an optional `config.toml` in the
//! resolved config directory, then `GOG_*` environment overrides.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::path::Paths;

/// Typed application configuration, distinct from the OAuth client
/// credentials file (that one holds secrets; this one holds policy
/// knobs like retry limits and timeouts).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_reset_secs")]
    pub breaker_reset_secs: u64,
    #[serde(default = "default_max_429_retries")]
    pub max_429_retries: u32,
    #[serde(default = "default_max_5xx_retries")]
    pub max_5xx_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_manage_server_timeout_secs")]
    pub manage_server_timeout_secs: u64,
    #[serde(default)]
    pub keyring_backend: Option<String>,
}

fn default_breaker_threshold() -> u32 {
    crate::breaker::THRESHOLD
}

fn default_breaker_reset_secs() -> u64 {
    crate::breaker::RESET_TIME.as_secs()
}

fn default_max_429_retries() -> u32 {
    crate::transport::MAX_429_RETRIES
}

fn default_max_5xx_retries() -> u32 {
    crate::transport::MAX_5XX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_manage_server_timeout_secs() -> u64 {
    600
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            breaker_threshold: default_breaker_threshold(),
            breaker_reset_secs: default_breaker_reset_secs(),
            max_429_retries: default_max_429_retries(),
            max_5xx_retries: default_max_5xx_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            manage_server_timeout_secs: default_manage_server_timeout_secs(),
            keyring_backend: None,
        }
    }
}

impl AppConfig {
    /// Layer defaults, `<config_dir>/config.toml`, and `GOG_`-prefixed
    /// environment variables, in that order.
    pub fn load(paths: &Paths) -> Result<Self> {
        let config_file = paths.root().join("config.toml");

        let defaults = AppConfig::default();
        let builder = config::Config::builder()
            .set_default("breaker_threshold", defaults.breaker_threshold)?
            .set_default("breaker_reset_secs", defaults.breaker_reset_secs)?
            .set_default("max_429_retries", defaults.max_429_retries)?
            .set_default("max_5xx_retries", defaults.max_5xx_retries)?
            .set_default("retry_base_delay_ms", defaults.retry_base_delay_ms)?
            .set_default(
                "manage_server_timeout_secs",
                defaults.manage_server_timeout_secs,
            )?
            .add_source(config::File::from(config_file).required(false))
            .add_source(config::Environment::with_prefix("GOG"));

        let raw = builder.build().map_err(|e| Error::Config(e.to_string()))?;
        raw.try_deserialize().map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_component_constants() {
        let config = AppConfig::default();
        assert_eq!(config.breaker_threshold, crate::breaker::THRESHOLD);
        assert_eq!(config.max_429_retries, crate::transport::MAX_429_RETRIES);
    }

    #[test]
    fn loads_overrides_from_file() {
        let tmp = tempdir().unwrap();
        let paths = Paths::at(tmp.path().join("cfg")).unwrap();
        std::fs::write(paths.root().join("config.toml"), "retry_base_delay_ms = 42\n").unwrap();

        let config = AppConfig::load(&paths).unwrap();
        assert_eq!(config.retry_base_delay_ms, 42);
    }

    #[test]
    fn env_override_wins_over_file() {
        let tmp = tempdir().unwrap();
        let paths = Paths::at(tmp.path().join("cfg")).unwrap();
        std::fs::write(paths.root().join("config.toml"), "retry_base_delay_ms = 42\n").unwrap();

        temp_env::with_var("GOG_RETRY_BASE_DELAY_MS", Some("7"), || {
            let config = AppConfig::load(&paths).unwrap();
            assert_eq!(config.retry_base_delay_ms, 7);
        });
    }
}
