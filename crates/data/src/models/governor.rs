//! Kill-switch state, its audit trail and the config versions it published.

use anyhow::Result;
use chrono::{DateTime, Utc};
use confluence_core::ConfigVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kill-switch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GovernorMode {
    /// Evaluating performance, enhanced parameters in force.
    Monitoring,
    /// Tripped. Legacy parameters in force until manual deactivation.
    Active,
}

impl GovernorMode {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitoring => "MONITORING",
            Self::Active => "ACTIVE",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MONITORING" => Some(Self::Monitoring),
            "ACTIVE" => Some(Self::Active),
            _ => None,
        }
    }
}

/// The single `governor_state` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GovernorStateRecord {
    /// "MONITORING" or "ACTIVE".
    pub mode: String,
    pub activated_at: Option<DateTime<Utc>>,
    pub activation_reason: Option<String>,
    /// Win rate seen by the last evaluation.
    pub win_rate: Option<f64>,
    /// Closed signals seen by the last evaluation.
    pub closed_count: Option<i64>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl GovernorStateRecord {
    /// Fresh state: monitoring, never evaluated.
    #[must_use]
    pub fn monitoring(now: DateTime<Utc>) -> Self {
        Self {
            mode: GovernorMode::Monitoring.as_str().to_string(),
            activated_at: None,
            activation_reason: None,
            win_rate: None,
            closed_count: None,
            last_check_at: None,
            updated_at: now,
        }
    }

    /// Tripped state carrying the reason and the metrics that tripped it.
    #[must_use]
    pub fn active(
        reason: impl Into<String>,
        win_rate: f64,
        closed_count: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: GovernorMode::Active.as_str().to_string(),
            activated_at: Some(now),
            activation_reason: Some(reason.into()),
            win_rate: Some(win_rate),
            closed_count: Some(closed_count),
            last_check_at: Some(now),
            updated_at: now,
        }
    }

    /// Unknown mode strings read as monitoring.
    #[must_use]
    pub fn mode(&self) -> GovernorMode {
        GovernorMode::parse(&self.mode).unwrap_or(GovernorMode::Monitoring)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mode() == GovernorMode::Active
    }

    /// Overwrites the evaluation metrics. Mode and activation are untouched.
    pub fn apply_metrics(&mut self, metrics: &GovernorMetrics) {
        self.win_rate = metrics.win_rate;
        self.closed_count = metrics.closed_count;
        self.last_check_at = metrics.last_check_at;
        self.updated_at = metrics.updated_at;
    }
}

/// Evaluation metrics written to the state row between transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorMetrics {
    pub win_rate: Option<f64>,
    pub closed_count: Option<i64>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Who caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionActor {
    Governor,
    Manual,
}

impl TransitionActor {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Governor => "governor",
            Self::Manual => "manual",
        }
    }
}

/// Append-only row in `governor_audit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GovernorAuditRecord {
    /// Assigned by the store; 0 before insertion.
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub from_mode: String,
    pub to_mode: String,
    pub reason: String,
    pub win_rate: Option<f64>,
    pub closed_count: Option<i64>,
    /// "governor" or "manual".
    pub actor: String,
    /// Config version published alongside the transition, if any.
    pub config_version: Option<i64>,
    pub details: Option<JsonValue>,
}

impl GovernorAuditRecord {
    #[must_use]
    pub fn new(
        from: GovernorMode,
        to: GovernorMode,
        reason: impl Into<String>,
        actor: TransitionActor,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            recorded_at,
            from_mode: from.as_str().to_string(),
            to_mode: to.as_str().to_string(),
            reason: reason.into(),
            win_rate: None,
            closed_count: None,
            actor: actor.as_str().to_string(),
            config_version: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, win_rate: f64, closed_count: i64) -> Self {
        self.win_rate = Some(win_rate);
        self.closed_count = Some(closed_count);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

/// A published configuration version as stored in `config_versions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigVersionRecord {
    pub version: i64,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub multiplier_mode: String,
    /// Full serialized [`ConfigVersion`].
    pub config: JsonValue,
}

impl ConfigVersionRecord {
    /// Serializes a live version.
    ///
    /// # Errors
    /// Returns an error if the version cannot be serialized or overflows `i64`.
    pub fn from_version(version: &ConfigVersion) -> Result<Self> {
        Ok(Self {
            version: i64::try_from(version.version)?,
            published_at: version.published_at,
            source: version.source.clone(),
            multiplier_mode: version.multiplier_mode.as_str().to_string(),
            config: serde_json::to_value(version)?,
        })
    }

    /// Deserializes the stored version.
    ///
    /// # Errors
    /// Returns an error if the stored JSON is not a valid [`ConfigVersion`].
    pub fn to_version(&self) -> Result<ConfigVersion> {
        Ok(serde_json::from_value(self.config.clone())?)
    }
}

/// Everything one governor transition writes, committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorTransition {
    pub state: GovernorStateRecord,
    pub audit: GovernorAuditRecord,
    pub config_version: Option<ConfigVersionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use confluence_core::{Direction, MultiplierMode, ScoringConfig, StopMultipliers};

    #[test]
    fn test_mode_parse() {
        assert_eq!(GovernorMode::parse("active"), Some(GovernorMode::Active));
        assert_eq!(GovernorMode::parse("MONITORING"), Some(GovernorMode::Monitoring));
        assert_eq!(GovernorMode::parse("paused"), None);
    }

    #[test]
    fn test_active_state_carries_metrics() {
        let now = Utc::now();
        let state = GovernorStateRecord::active("win rate 30.0% below 35.0%", 0.3, 20, now);
        assert!(state.is_active());
        assert_eq!(state.activated_at, Some(now));
        assert_eq!(state.closed_count, Some(20));
        assert!(state.activation_reason.is_some());
    }

    #[test]
    fn test_metrics_leave_activation_alone() {
        let now = Utc::now();
        let mut state = GovernorStateRecord::active("tripped", 0.3, 20, now);
        let later = now + chrono::Duration::hours(1);
        state.apply_metrics(&GovernorMetrics {
            win_rate: Some(0.7),
            closed_count: Some(30),
            last_check_at: Some(later),
            updated_at: later,
        });
        assert!(state.is_active());
        assert_eq!(state.activated_at, Some(now));
        assert_eq!(state.activation_reason.as_deref(), Some("tripped"));
        assert_eq!(state.win_rate, Some(0.7));
        assert_eq!(state.closed_count, Some(30));
    }

    #[test]
    fn test_unknown_mode_reads_as_monitoring() {
        let mut state = GovernorStateRecord::monitoring(Utc::now());
        state.mode = "garbage".to_string();
        assert_eq!(state.mode(), GovernorMode::Monitoring);
    }

    #[test]
    fn test_config_version_record_roundtrip() {
        let version = ConfigVersion::initial(ScoringConfig::default()).with_governed_multipliers(
            Direction::Sell,
            StopMultipliers::new(1.0, 1.0),
            MultiplierMode::Legacy,
            "governor",
        );
        let record = ConfigVersionRecord::from_version(&version).unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.multiplier_mode, "legacy");
        assert_eq!(record.to_version().unwrap(), version);
    }
}
