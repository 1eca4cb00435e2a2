//! Logging setup for the multiverse server.
//!
//! Every line carries its target, so the noisy parts of a session (uber state
//! reconciliation in `game_server::sync`, per-tick handler chatter in
//! `game_server::handlers`) can be tuned separately through
//! [`LoggingSettings::directives`]. `RUST_LOG` replaces the configured filter.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter built from the configured level and per-module directives.
pub fn settings_filter(settings: &LoggingSettings) -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::try_new(&settings.level)?;
    for directive in &settings.directives {
        filter = filter.add_directive(directive.parse::<Directive>()?);
    }
    Ok(filter)
}

/// Installs the global subscriber.
pub fn setup_logging(settings: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => settings_filter(settings)?,
    };

    let (json, plain) = if settings.json_format {
        (Some(fmt::layer().json().with_target(true)), None)
    } else {
        (None, Some(fmt::layer().compact().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()?;

    info!(
        "🔧 Logging initialized: level {}, {} module override(s), {} output",
        settings.level,
        settings.directives.len(),
        if settings.json_format { "json" } else { "plain" }
    );
    Ok(())
}

pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║          🌌 MULTIVERSE SERVER 🌌         ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  🔄 Uber State Synchronization           ║");
    info!("║  🎮 Normal / Hide and Seek / Infection   ║");
    info!("║  🏆 League                               ║");
    info!("╚══════════════════════════════════════════╝");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(level: &str, directives: &[&str]) -> LoggingSettings {
        LoggingSettings {
            level: level.to_string(),
            json_format: false,
            directives: directives.iter().map(|directive| directive.to_string()).collect(),
        }
    }

    #[test]
    fn test_filter_includes_module_overrides() {
        let filter = settings_filter(&settings("info", &["game_server::sync=warn", "game_server::handlers=debug"]))
            .unwrap()
            .to_string();

        assert!(filter.contains("info"), "{filter}");
        assert!(filter.contains("game_server::sync=warn"), "{filter}");
        assert!(filter.contains("game_server::handlers=debug"), "{filter}");
    }

    #[test]
    fn test_malformed_directive_is_rejected() {
        assert!(settings_filter(&settings("info", &["game_server::sync=loud"])).is_err());
    }
}
