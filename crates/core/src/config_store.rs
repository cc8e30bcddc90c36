//! Versioned, copy-on-write configuration store.
//!
//! Readers call [`ConfigStore::current`] once per cycle and keep the returned
//! `Arc` for the whole cycle. Writers never mutate a published version; they
//! build the next version and publish it atomically, so a concurrent reader
//! sees either the old or the new version, never a mix.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{GovernorConfig, ScoringConfig, StopMultipliers};
use crate::error::ConfigError;
use crate::signal::Direction;

/// Which multiplier set is in force for the governed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiplierMode {
    /// Confidence-scaled multipliers from configuration
    Enhanced,
    /// Conservative multipliers restored by the kill switch
    Legacy,
}

impl MultiplierMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enhanced => "enhanced",
            Self::Legacy => "legacy",
        }
    }
}

/// One immutable published configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    /// Who published this version and why
    pub source: String,
    pub multiplier_mode: MultiplierMode,
    pub scoring: ScoringConfig,
}

impl ConfigVersion {
    /// First version built from loaded configuration.
    #[must_use]
    pub fn initial(scoring: ScoringConfig) -> Self {
        Self {
            version: 1,
            published_at: Utc::now(),
            source: "initial".to_string(),
            multiplier_mode: MultiplierMode::Enhanced,
            scoring,
        }
    }

    /// Successor carrying a new scoring config. Mode is preserved.
    #[must_use]
    pub fn successor(&self, scoring: ScoringConfig, source: impl Into<String>) -> Self {
        Self {
            version: self.version + 1,
            published_at: Utc::now(),
            source: source.into(),
            multiplier_mode: self.multiplier_mode,
            scoring,
        }
    }

    /// Successor with the governed direction's multipliers replaced.
    #[must_use]
    pub fn with_governed_multipliers(
        &self,
        direction: Direction,
        multipliers: StopMultipliers,
        mode: MultiplierMode,
        source: impl Into<String>,
    ) -> Self {
        let mut scoring = self.scoring.clone();
        scoring.stop_loss.set_multipliers(direction, multipliers);
        let mut next = self.successor(scoring, source);
        next.multiplier_mode = mode;
        next
    }

    /// Multipliers currently in force for a direction.
    #[must_use]
    pub fn multipliers(&self, direction: Direction) -> Option<StopMultipliers> {
        self.scoring
            .stop_loss
            .for_direction(direction)
            .map(|s| s.multipliers)
    }
}

/// Shared handle to the live configuration.
///
/// Cloning the store clones the handle; every clone sees the same versions.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<ConfigVersion>>>,
}

impl ConfigStore {
    /// Creates a store holding `initial` as the current version.
    ///
    /// # Errors
    /// Returns an error if the initial scoring config is invalid.
    pub fn new(initial: ConfigVersion) -> Result<Self, ConfigError> {
        initial.scoring.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self { tx: Arc::new(tx) })
    }

    /// Creates a store from a scoring config at version 1.
    ///
    /// # Errors
    /// Returns an error if the scoring config is invalid.
    pub fn from_scoring(scoring: ScoringConfig) -> Result<Self, ConfigError> {
        Self::new(ConfigVersion::initial(scoring))
    }

    /// The version in force right now.
    #[must_use]
    pub fn current(&self) -> Arc<ConfigVersion> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigVersion>> {
        self.tx.subscribe()
    }

    /// Publishes `next`, which must be exactly one version ahead of current.
    ///
    /// # Errors
    /// - [`ConfigError::Invalid`] if `next` fails validation
    /// - [`ConfigError::VersionConflict`] if another writer published first
    pub fn publish(&self, next: ConfigVersion) -> Result<Arc<ConfigVersion>, ConfigError> {
        next.scoring.validate()?;
        let next = Arc::new(next);
        let mut conflict = None;
        self.tx.send_if_modified(|current| {
            let expected = current.version + 1;
            if next.version == expected {
                *current = Arc::clone(&next);
                true
            } else {
                conflict = Some(ConfigError::VersionConflict {
                    expected,
                    found: next.version,
                });
                false
            }
        });
        match conflict {
            Some(err) => Err(err),
            None => {
                tracing::info!(
                    version = next.version,
                    source = %next.source,
                    mode = next.multiplier_mode.as_str(),
                    "Published configuration version"
                );
                Ok(next)
            }
        }
    }

    /// Builds the next version from whatever is current and publishes it
    /// atomically. `build` may run against a newer version than the caller
    /// last observed; it must derive the successor from its argument.
    ///
    /// # Errors
    /// Returns an error if the built version is invalid or not a successor.
    pub fn update<F>(&self, build: F) -> Result<Arc<ConfigVersion>, ConfigError>
    where
        F: FnOnce(&ConfigVersion) -> ConfigVersion,
    {
        let mut outcome: Result<Arc<ConfigVersion>, ConfigError> =
            Err(ConfigError::VersionConflict {
                expected: 0,
                found: 0,
            });
        self.tx.send_if_modified(|current| {
            let next = build(current);
            let expected = current.version + 1;
            if next.version != expected {
                outcome = Err(ConfigError::VersionConflict {
                    expected,
                    found: next.version,
                });
                return false;
            }
            if let Err(e) = next.scoring.validate() {
                outcome = Err(e.into());
                return false;
            }
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            outcome = Ok(next);
            true
        });
        if let Ok(version) = &outcome {
            tracing::info!(
                version = version.version,
                source = %version.source,
                mode = version.multiplier_mode.as_str(),
                "Published configuration version"
            );
        }
        outcome
    }

    /// Renumbers the current version to `floor + 1` unless it is already
    /// above `floor`. The contents stay as they are. Called at startup with
    /// the highest persisted version so new versions never reuse a number.
    pub fn advance_past(&self, floor: u64) -> Arc<ConfigVersion> {
        let mut advanced = false;
        self.tx.send_if_modified(|current| {
            if current.version > floor {
                return false;
            }
            let mut next = ConfigVersion::clone(current);
            next.version = floor.saturating_add(1);
            *current = Arc::new(next);
            advanced = true;
            true
        });
        let current = self.current();
        if advanced {
            tracing::info!(
                version = current.version,
                floor,
                "Advanced configuration version past persisted history"
            );
        }
        current
    }

    /// Publishes a reloaded scoring config. While the legacy multipliers are
    /// in force, they are re-applied on top of the reloaded values.
    ///
    /// # Errors
    /// Returns an error if the reloaded config is invalid.
    pub fn reload(
        &self,
        scoring: ScoringConfig,
        governor: &GovernorConfig,
    ) -> Result<Arc<ConfigVersion>, ConfigError> {
        self.update(|current| {
            let mut scoring = scoring;
            if current.multiplier_mode == MultiplierMode::Legacy {
                scoring
                    .stop_loss
                    .set_multipliers(governor.governed_direction, governor.legacy_multipliers);
            }
            current.successor(scoring, "reload")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        ConfigStore::from_scoring(ScoringConfig::default()).unwrap()
    }

    #[test]
    fn initial_version_is_one() {
        let store = store();
        assert_eq!(store.current().version, 1);
        assert_eq!(store.current().multiplier_mode, MultiplierMode::Enhanced);
    }

    #[test]
    fn publish_successor_advances_version() {
        let store = store();
        let current = store.current();
        let next = current.successor(current.scoring.clone(), "test");
        let published = store.publish(next).unwrap();
        assert_eq!(published.version, 2);
        assert_eq!(store.current().version, 2);
    }

    #[test]
    fn stale_publish_is_a_conflict() {
        let store = store();
        let base = store.current();
        store
            .publish(base.successor(base.scoring.clone(), "first"))
            .unwrap();

        let err = store
            .publish(base.successor(base.scoring.clone(), "second"))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::VersionConflict {
                expected: 3,
                found: 2
            }
        );
        assert_eq!(store.current().source, "first");
    }

    #[test]
    fn invalid_publish_leaves_current_untouched() {
        let store = store();
        let current = store.current();
        let mut scoring = current.scoring.clone();
        scoring.thresholds.buy = 10.0;
        assert!(matches!(
            store.publish(current.successor(scoring, "bad")),
            Err(ConfigError::Invalid(_))
        ));
        assert_eq!(store.current().version, 1);
    }

    #[test]
    fn readers_keep_their_snapshot_after_publish() {
        let store = store();
        let held = store.current();
        store
            .update(|c| {
                c.with_governed_multipliers(
                    Direction::Sell,
                    StopMultipliers::new(1.0, 1.0),
                    MultiplierMode::Legacy,
                    "governor",
                )
            })
            .unwrap();

        assert_eq!(
            held.multipliers(Direction::Sell),
            Some(StopMultipliers::new(0.8, 1.5))
        );
        assert_eq!(
            store.current().multipliers(Direction::Sell),
            Some(StopMultipliers::new(1.0, 1.0))
        );
    }

    #[test]
    fn reload_preserves_legacy_multipliers() {
        let store = store();
        let governor = GovernorConfig::default();
        store
            .update(|c| {
                c.with_governed_multipliers(
                    Direction::Sell,
                    governor.legacy_multipliers,
                    MultiplierMode::Legacy,
                    "governor",
                )
            })
            .unwrap();

        let reloaded = store.reload(ScoringConfig::default(), &governor).unwrap();
        assert_eq!(reloaded.multiplier_mode, MultiplierMode::Legacy);
        assert_eq!(
            reloaded.multipliers(Direction::Sell),
            Some(governor.legacy_multipliers)
        );
        assert_eq!(reloaded.version, 3);
    }

    #[test]
    fn advance_past_skips_persisted_numbers() {
        let store = store();
        let advanced = store.advance_past(4);
        assert_eq!(advanced.version, 5);
        assert_eq!(advanced.scoring, ScoringConfig::default());
        assert_eq!(advanced.multiplier_mode, MultiplierMode::Enhanced);

        // Already ahead: nothing changes.
        assert_eq!(store.advance_past(2).version, 5);

        let current = store.current();
        let next = current.successor(current.scoring.clone(), "after restart");
        assert_eq!(store.publish(next).unwrap().version, 6);
    }

    #[tokio::test]
    async fn subscribers_are_notified() {
        let store = store();
        let mut rx = store.subscribe();
        let current = store.current();
        store
            .publish(current.successor(current.scoring.clone(), "test"))
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, 2);
    }

    #[test]
    fn concurrent_updates_never_skip_versions() {
        let store = store();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .update(|c| c.successor(c.scoring.clone(), "thread"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.current().version, 1 + 8 * 25);
    }
}
