//! Main application logic and lifecycle management.
//!
//! The [`Application`] wires the backend services together, periodically
//! disposes idle game handlers and, on shutdown, persists the snapshot of
//! every live handler.

use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{exit_on_second_signal, shutdown_on_signal};
use game_server::connections::InMemoryConnections;
use game_server::storage::MemoryStorage;
use game_server::sync::StateSynchronization;
use game_server::{GameHandlerRegistry, HandlerServices, SeedGeneratorService, ServerError};
use multiverse_event_system::ShutdownState;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct Application {
    config: AppConfig,
    registry: Arc<GameHandlerRegistry>,
    connections: Arc<InMemoryConnections>,
}

impl Application {
    /// Builds every service from a validated configuration.
    ///
    /// A missing seed generator executable is a fatal configuration error.
    pub fn new(config: AppConfig) -> Result<Self, ServerError> {
        let storage = Arc::new(MemoryStorage::new());
        let connections = Arc::new(InMemoryConnections::new());
        let sync = Arc::new(StateSynchronization::new(storage.clone(), connections.clone()));

        let seed_generator = SeedGeneratorService::from_config(&config.server, storage.clone())?;
        if !seed_generator.executable().exists() {
            return Err(ServerError::Configuration(format!(
                "Seed generator executable {} does not exist",
                seed_generator.executable().display()
            )));
        }
        info!("🌱 Seed generator: {}", seed_generator.executable().display());

        let services = HandlerServices {
            storage,
            connections: connections.clone(),
            sync,
            seed_generator: Some(Arc::new(seed_generator)),
            config: Arc::new(config.server.clone()),
        };

        Ok(Self {
            config,
            registry: GameHandlerRegistry::new(services),
            connections,
        })
    }

    pub fn registry(&self) -> &Arc<GameHandlerRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<InMemoryConnections> {
        &self.connections
    }

    /// Shutdown state shared with the registry.
    pub fn shutdown_state(&self) -> &ShutdownState {
        self.registry.shutdown_state()
    }

    /// Runs until a termination signal arrives, then shuts down gracefully.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let shutdown = self.shutdown_state().clone();
        self.run_until(async move {
            shutdown_on_signal(&shutdown).await?;
            exit_on_second_signal();
            Ok::<_, io::Error>(())
        })
        .await
    }

    /// Serves until `stop` resolves, then persists every live handler.
    ///
    /// `stop` should initiate [`Application::shutdown_state`]; the registry
    /// refuses new handlers from then on.
    pub async fn run_until<F>(self, stop: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = io::Result<()>>,
    {
        display_banner();
        self.log_configuration_summary();

        let sweeper = self.spawn_idle_sweeper();

        info!("✅ Multiverse server is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        stop.await?;

        sweeper.abort();
        self.shutdown().await;

        info!("✅ Multiverse server shutdown complete");
        Ok(())
    }

    /// Persists and stops every live game handler.
    pub async fn shutdown(&self) {
        info!("💾 Persisting {} active game handler(s)...", self.registry.active_handlers());
        self.registry.shutdown_all().await;
        info!(
            "📊 Final state: {} handler(s) active, {} player connection(s) open",
            self.registry.active_handlers(),
            self.connections.connected_players()
        );
    }

    fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = Duration::from_secs(self.config.server.idle_sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if registry.shutdown_state().is_shutdown_initiated() {
                    break;
                }

                let disposed = registry.sweep_idle().await;
                debug!(
                    "🧹 Idle sweep: {} disposed, {} active",
                    disposed,
                    registry.active_handlers()
                );
            }
        })
    }

    fn log_configuration_summary(&self) {
        let server = &self.config.server;
        info!("📋 Configuration Summary:");
        info!("  ⏱️ Tick interval: {}ms", server.tick_interval_ms);
        info!("  🧹 Idle sweep interval: {}s", server.idle_sweep_interval_secs);
        info!(
            "  🌱 Seed generation: {} worker(s), {}ms timeout",
            server.seedgen.worker_pool_size, server.seedgen.timeout_ms
        );
        info!(
            "  🙈 Hide and seek: {}s hiding, catch radius {}",
            server.hide_and_seek.hiding_seconds, server.hide_and_seek.catch_radius
        );
        info!("  🦠 Infection radius: {}", server.infection.infection_radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_server::storage::Storage;
    use game_server::GameHandlerType;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config_with_seedgen(executable: Option<PathBuf>) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.seedgen.executable = executable;
        config
    }

    #[test]
    fn test_missing_seedgen_is_fatal() {
        let result = Application::new(config_with_seedgen(None));
        assert!(matches!(result, Err(ServerError::Configuration(_))));

        let result = Application::new(config_with_seedgen(Some(PathBuf::from("/nonexistent/seedgen"))));
        assert!(matches!(result, Err(ServerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_shutdown_persists_live_handlers() {
        let dir = TempDir::new().unwrap();
        let executable = dir.path().join("seedgen");
        std::fs::write(&executable, "#!/bin/sh\nexit 1\n").unwrap();

        let app = Application::new(config_with_seedgen(Some(executable))).unwrap();
        let (multiverse, _) = app
            .registry()
            .start_multiverse(GameHandlerType::LEAGUE)
            .await
            .unwrap();
        assert_eq!(app.registry().active_handlers(), 1);

        app.shutdown().await;

        assert_eq!(app.registry().active_handlers(), 0);
        let record = app
            .registry()
            .services()
            .storage
            .find_multiverse(multiverse.id)
            .await
            .unwrap();
        assert!(record.game_handler_state.is_some());
    }

    #[tokio::test]
    async fn test_stop_request_closes_registry_before_snapshot_pass() {
        let dir = TempDir::new().unwrap();
        let executable = dir.path().join("seedgen");
        std::fs::write(&executable, "#!/bin/sh\nexit 1\n").unwrap();

        let app = Application::new(config_with_seedgen(Some(executable))).unwrap();
        let registry = app.registry().clone();
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::LEAGUE).await.unwrap();

        let shutdown = app.shutdown_state().clone();
        let during_stop = registry.clone();
        app.run_until(async move {
            shutdown.initiate_shutdown();
            assert!(during_stop.start_multiverse(GameHandlerType::NORMAL).await.is_err());
            assert_eq!(during_stop.active_handlers(), 1);
            Ok::<_, io::Error>(())
        })
        .await
        .unwrap();

        assert!(registry.shutdown_state().is_shutdown_complete());
        assert_eq!(registry.active_handlers(), 0);
        let record = registry.services().storage.find_multiverse(multiverse.id).await.unwrap();
        assert!(record.game_handler_state.is_some());
    }
}
