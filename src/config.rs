//! Process-wide defaults for the crate's own ambient behavior — logging,
//! the default relational-backend location, cleanup policy — as distinct
//! from the per-wrap `RecoveryConfig` in `types.rs`. Built the way a small
//! service's own configuration is built: typed defaults, an environment
//! override layer, optional `.env` loading.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryServiceConfig {
    pub app_name: String,
    pub log_level: String,
    pub environment: String,
    /// SQLite connection string for the relational backend; falls back to
    /// `~/.<app_name>/data/recovery.db` when unset.
    pub database_url: Option<String>,
    pub default_cleanup_age_days: i64,
    pub default_circuit_breaker_threshold: u32,
    pub default_circuit_breaker_timeout_secs: u64,
}

impl RecoveryServiceConfig {
    pub fn from_env(app_name: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let built = Config::builder()
            .set_default("app_name", app_name)?
            .set_default("log_level", "info")?
            .set_default("environment", "development")?
            .set_default("default_cleanup_age_days", 30)?
            .set_default("default_circuit_breaker_threshold", 5)?
            .set_default("default_circuit_breaker_timeout_secs", 300)?
            .add_source(Environment::default().separator("__"))
            .build()?;

        let mut service_config: RecoveryServiceConfig = built.try_deserialize()?;

        if let Ok(level) = env::var("RUST_LOG") {
            service_config.log_level = level;
        }

        Ok(service_config)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.default_circuit_breaker_timeout_secs)
    }
}

impl Default for RecoveryServiceConfig {
    fn default() -> Self {
        Self {
            app_name: "recovery-runtime".to_string(),
            log_level: "info".to_string(),
            environment: "development".to_string(),
            database_url: None,
            default_cleanup_age_days: 30,
            default_circuit_breaker_threshold: 5,
            default_circuit_breaker_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_environment() {
        let config = RecoveryServiceConfig::default();
        assert_eq!(config.default_cleanup_age_days, 30);
        assert_eq!(config.circuit_breaker_timeout(), Duration::from_secs(300));
    }
}
