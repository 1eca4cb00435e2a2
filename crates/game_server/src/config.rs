//! Server configuration types and defaults.
//!
//! [`ServerConfig`] carries every tunable of the multiverse backend. Missing
//! fields fall back to their defaults when deserialized, and the seed
//! generator settings can be overridden from the environment.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Environment variable naming the seed generator executable.
pub const SEEDGEN_PATH_ENV: &str = "SEEDGEN_PATH";
/// Environment variable overriding the generation timeout in milliseconds.
pub const SEEDGEN_TIMEOUT_ENV: &str = "SEEDGEN_TIMEOUT";

/// Configuration structure for the multiverse backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Period of every game handler's scheduler in milliseconds
    pub tick_interval_ms: u64,

    /// How often idle game handlers are persisted and disposed, in seconds
    pub idle_sweep_interval_secs: u64,

    pub seedgen: SeedGenSettings,
    pub hide_and_seek: HideAndSeekSettings,
    pub infection: InfectionSettings,
    pub league: LeagueSettings,
}

/// External seed generator process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedGenSettings {
    /// Path of the generator executable; `SEEDGEN_PATH` when unset
    pub executable: Option<PathBuf>,
    /// Time budget of one generation
    pub timeout_ms: u64,
    /// Maximum number of generator processes running at once
    pub worker_pool_size: usize,
}

/// Hide-and-Seek timings and seeker abilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HideAndSeekSettings {
    /// Length of the hiding phase
    pub hiding_seconds: i64,
    /// Interval before the first hider reveal
    pub seeker_hint_base_interval: i64,
    /// Factor applied to the reveal interval after each reveal
    pub seeker_hint_interval_multiplier: f32,
    /// Shortest reveal interval
    pub seeker_hint_min_interval: i64,
    pub catch_radius: f32,
    pub catch_cooldown: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfectionSettings {
    pub infection_radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueSettings {
    /// Largest accepted save file submission
    pub max_save_file_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            idle_sweep_interval_secs: 60,
            seedgen: SeedGenSettings::default(),
            hide_and_seek: HideAndSeekSettings::default(),
            infection: InfectionSettings::default(),
            league: LeagueSettings::default(),
        }
    }
}

impl Default for SeedGenSettings {
    fn default() -> Self {
        Self {
            executable: None,
            timeout_ms: 30_000,
            worker_pool_size: 4,
        }
    }
}

impl Default for HideAndSeekSettings {
    fn default() -> Self {
        Self {
            hiding_seconds: 600,
            seeker_hint_base_interval: 600,
            seeker_hint_interval_multiplier: 0.75,
            seeker_hint_min_interval: 45,
            catch_radius: 8.0,
            catch_cooldown: 6.0,
        }
    }
}

impl Default for InfectionSettings {
    fn default() -> Self {
        Self { infection_radius: 8.0 }
    }
}

impl Default for LeagueSettings {
    fn default() -> Self {
        Self {
            max_save_file_bytes: 256 * 1024,
        }
    }
}

impl ServerConfig {
    /// Applies `SEEDGEN_PATH` and `SEEDGEN_TIMEOUT` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(SEEDGEN_PATH_ENV).filter(|path| !path.is_empty()) {
            self.seedgen.executable = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup(SEEDGEN_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(timeout_ms) => self.seedgen.timeout_ms = timeout_ms,
                Err(_) => warn!(
                    "⚠️ Ignoring {}='{}': not a number of milliseconds",
                    SEEDGEN_TIMEOUT_ENV, raw
                ),
            }
        }
    }

    /// The configured generator executable.
    pub fn seedgen_executable(&self) -> Result<PathBuf, ServerError> {
        self.seedgen.executable.clone().ok_or_else(|| {
            ServerError::Configuration(format!(
                "No seed generator available! Set {SEEDGEN_PATH_ENV} or seedgen.executable"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.seedgen.timeout_ms, 30_000);
        assert_eq!(config.seedgen.worker_pool_size, 4);
        assert_eq!(config.hide_and_seek.hiding_seconds, 600);
        assert_eq!(config.hide_and_seek.seeker_hint_min_interval, 45);
        assert_eq!(config.league.max_save_file_bytes, 262_144);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"hide_and_seek": {"catch_radius": 4.5}}"#).unwrap();
        assert_eq!(config.hide_and_seek.catch_radius, 4.5);
        assert_eq!(config.hide_and_seek.catch_cooldown, 6.0);
        assert_eq!(config.idle_sweep_interval_secs, 60);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(SEEDGEN_PATH_ENV, "/opt/seedgen/seedgen"), (SEEDGEN_TIMEOUT_ENV, "1500")]);
        let mut config = ServerConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.seedgen_executable().unwrap(), PathBuf::from("/opt/seedgen/seedgen"));
        assert_eq!(config.seedgen.timeout_ms, 1500);
    }

    #[test]
    fn test_invalid_timeout_is_ignored() {
        let mut config = ServerConfig::default();
        config.apply_overrides_from(|key| (key == SEEDGEN_TIMEOUT_ENV).then(|| "soon".to_string()));
        assert_eq!(config.seedgen.timeout_ms, 30_000);
    }

    #[test]
    fn test_missing_executable_is_configuration_error() {
        let config = ServerConfig::default();
        assert!(matches!(config.seedgen_executable(), Err(ServerError::Configuration(_))));
    }
}
