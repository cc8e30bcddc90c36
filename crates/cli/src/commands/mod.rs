//! CLI commands for the confluence engine.

pub mod analyze;
pub mod governor;
pub mod monitor;
pub mod stop_loss;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use confluence_core::{AppConfig, ConfigLoader, ConfigStore};
use confluence_data::{GovernorStateStore, InMemoryStore, PerformanceStore, PgStore};
use confluence_governor::{PerformanceGovernor, TracingAlertSink};

pub use analyze::{run_analyze, AnalyzeArgs};
pub use governor::{run_governor, GovernorArgs};
pub use monitor::{run_monitor, MonitorArgs};
pub use stop_loss::{run_stop_loss, StopLossArgs};

/// Settings shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config_path: PathBuf,
    pub config: AppConfig,
    pub database_url: Option<String>,
}

/// Persistence handles for one invocation.
pub struct Stores {
    pub performance: Arc<dyn PerformanceStore>,
    pub governor_state: Arc<dyn GovernorStateStore>,
    pub backend: &'static str,
}

impl Context {
    /// Loads the configuration file plus `CONFLUENCE_` environment overrides.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be parsed or is invalid.
    pub fn new(config_path: impl AsRef<Path>, database_url: Option<String>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = ConfigLoader::load_from(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;
        Ok(Self {
            config_path,
            config,
            database_url,
        })
    }

    /// A fresh store holding the configured scoring settings as version 1.
    ///
    /// # Errors
    /// Returns an error if the scoring settings fail validation.
    pub fn config_store(&self) -> Result<ConfigStore> {
        Ok(ConfigStore::from_scoring(self.config.scoring.clone())?)
    }

    /// PostgreSQL when a database URL is given, otherwise an empty in-memory store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached or migrated.
    pub async fn stores(&self) -> Result<Stores> {
        let Some(url) = &self.database_url else {
            tracing::warn!("No DATABASE_URL given, using an in-memory store");
            let store = Arc::new(InMemoryStore::new());
            return Ok(Stores {
                performance: store.clone(),
                governor_state: store,
                backend: "memory",
            });
        };

        let store = Arc::new(
            PgStore::connect(url, self.config.database.max_connections)
                .await
                .context("Failed to connect to database")?,
        );
        store.ensure_schema().await?;
        tracing::info!("Connected to database");
        Ok(Stores {
            performance: store.clone(),
            governor_state: store,
            backend: "postgres",
        })
    }

    /// A kill switch over `stores` that alerts through the log.
    #[must_use]
    pub fn governor(&self, config_store: ConfigStore, stores: &Stores) -> PerformanceGovernor {
        PerformanceGovernor::new(
            self.config.governor.clone(),
            stores.performance.clone(),
            stores.governor_state.clone(),
            config_store,
            Arc::new(TracingAlertSink),
        )
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
