use crate::config_loader::ConfigLoader;
use crate::config_store::ConfigStore;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

/// Watches the configuration file and republishes scoring settings into a
/// [`ConfigStore`] whenever it changes on disk.
pub struct ConfigWatcher {
    store: ConfigStore,
    config_path: PathBuf,
}

impl ConfigWatcher {
    #[must_use]
    pub fn new(store: ConfigStore, config_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            config_path: config_path.into(),
        }
    }

    /// Reloads the file once and publishes the result.
    ///
    /// Invalid files are rejected and the current version stays in force.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the store rejects it.
    pub fn reload_now(&self) -> Result<u64> {
        let config = ConfigLoader::load_from(&self.config_path)?;
        let published = self.store.reload(config.scoring, &config.governor)?;
        Ok(published.version)
    }

    /// Watches the configuration file for changes until the watcher fails.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(self) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(Path::new(&self.config_path), RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if event.kind.is_modify() {
                    tracing::info!(path = %self.config_path.display(), "Config file changed, reloading...");
                    match self.reload_now() {
                        Ok(version) => {
                            tracing::info!(version, "Config reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload config: {}", e);
                        }
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use std::io::Write;

    #[test]
    fn reload_now_publishes_new_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[scoring.thresholds]\nbuy = 62.0\nsell = 38.0").unwrap();

        let store = ConfigStore::from_scoring(ScoringConfig::default()).unwrap();
        let watcher = ConfigWatcher::new(store.clone(), &path);
        let version = watcher.reload_now().unwrap();

        assert_eq!(version, 2);
        assert!((store.current().scoring.thresholds.buy - 62.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_file_keeps_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "[scoring.thresholds]\nbuy = 30.0\nsell = 70.0\n").unwrap();

        let store = ConfigStore::from_scoring(ScoringConfig::default()).unwrap();
        let watcher = ConfigWatcher::new(store.clone(), &path);

        assert!(watcher.reload_now().is_err());
        assert_eq!(store.current().version, 1);
    }
}
