//! Configuration management for the multiverse server.
//!
//! The TOML file carries the backend's [`ServerConfig`] under `[server]` and
//! the logging setup under `[logging]`. Missing fields take their defaults.

use crate::cli::CliArgs;
use game_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend settings
    pub server: ServerConfig,
    pub logging: LoggingSettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Per-module overrides such as `game_server::sync=warn`
    pub directives: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            directives: Vec::new(),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to it and
    /// returns the defaults.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies environment overrides, then command-line overrides.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        self.server.apply_env_overrides();

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(path) = &args.seedgen_path {
            self.server.seedgen.executable = Some(path.clone());
        }
        if let Some(tick_interval_ms) = args.tick_interval_ms {
            self.server.tick_interval_ms = tick_interval_ms;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.tick_interval_ms == 0 {
            return Err("server.tick_interval_ms must be greater than 0".to_string());
        }

        if self.server.idle_sweep_interval_secs == 0 {
            return Err("server.idle_sweep_interval_secs must be greater than 0".to_string());
        }

        if self.server.seedgen.worker_pool_size == 0 {
            return Err("server.seedgen.worker_pool_size must be at least 1".to_string());
        }

        if self.server.seedgen.timeout_ms == 0 {
            return Err("server.seedgen.timeout_ms must be greater than 0".to_string());
        }

        let multiplier = self.server.hide_and_seek.seeker_hint_interval_multiplier;
        if !(multiplier > 0.0 && multiplier <= 1.0) {
            return Err(format!(
                "server.hide_and_seek.seeker_hint_interval_multiplier must be in (0, 1], got {multiplier}"
            ));
        }

        if self.server.hide_and_seek.seeker_hint_min_interval <= 0 {
            return Err("server.hide_and_seek.seeker_hint_min_interval must be greater than 0".to_string());
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LEVELS:?}",
                &self.logging.level
            ));
        }

        if let Err(e) = crate::logging::settings_filter(&self.logging) {
            return Err(format!("Invalid logging.directives: {e}"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    fn args() -> CliArgs {
        CliArgs {
            config_path: PathBuf::from("config.toml"),
            log_level: None,
            json_logs: false,
            seedgen_path: None,
            tick_interval_ms: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.tick_interval_ms, 1000);
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
tick_interval_ms = 500

[server.seedgen]
executable = "/opt/seedgen/seedgen"
worker_pool_size = 2

[server.hide_and_seek]
catch_radius = 5.5

[logging]
level = "debug"
json_format = true
directives = ["game_server::sync=warn"]
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.server.tick_interval_ms, 500);
        assert_eq!(config.server.seedgen.executable, Some(PathBuf::from("/opt/seedgen/seedgen")));
        assert_eq!(config.server.seedgen.worker_pool_size, 2);
        assert_eq!(config.server.seedgen.timeout_ms, 30_000);
        assert_eq!(config.server.hide_and_seek.catch_radius, 5.5);
        assert_eq!(config.server.hide_and_seek.hiding_seconds, 600);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.logging.directives, vec!["game_server::sync=warn".to_string()]);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            log_level: Some("warn".to_string()),
            json_logs: true,
            seedgen_path: Some(PathBuf::from("/usr/local/bin/seedgen")),
            tick_interval_ms: Some(100),
            ..args()
        };

        config.apply_overrides(&args);

        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert_eq!(config.server.seedgen.executable, Some(PathBuf::from("/usr/local/bin/seedgen")));
        assert_eq!(config.server.tick_interval_ms, 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.seedgen.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.hide_and_seek.seeker_hint_interval_multiplier = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.directives = vec!["game_server::sync=loud".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_accepts_every_level() {
        for level in VALID_LEVELS {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{level} should be valid");
        }
    }
}
