//! Read-only view of the kill switch.

use chrono::{DateTime, Utc};
use confluence_core::{Direction, MultiplierMode, StopMultipliers};
use confluence_data::GovernorMode;
use serde::{Deserialize, Serialize};

/// Outcome of one performance evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// True iff enough signals closed and the win rate is strictly below the minimum.
    pub trigger: bool,
    pub reason: String,
    /// `None` when the evaluation was throttled or no signal closed.
    pub win_rate: Option<f64>,
    pub closed_count: u64,
    pub wins: u64,
    pub throttled: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl Evaluation {
    pub(crate) fn throttled(remaining_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            trigger: false,
            reason: format!("throttled: next evaluation in {remaining_secs}s"),
            win_rate: None,
            closed_count: 0,
            wins: 0,
            throttled: true,
            evaluated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceView {
    pub win_rate: Option<f64>,
    pub closed_count: u64,
    pub wins: u64,
    pub lookback_days: i64,
    /// 95% Wilson interval on the win rate.
    pub win_rate_ci: Option<(f64, f64)>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdView {
    pub governed_direction: Direction,
    pub min_win_rate: f64,
    pub min_closed_signals: usize,
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierView {
    pub legacy: StopMultipliers,
    /// The confidence-scaled set used while monitoring.
    pub new: StopMultipliers,
    pub current_mode: MultiplierMode,
    /// What the live config holds for the governed direction.
    pub in_force: Option<StopMultipliers>,
    pub config_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationView {
    pub activated_at: DateTime<Utc>,
    pub reason: String,
}

/// Last-known kill-switch state. Never fails to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub mode: GovernorMode,
    pub is_active: bool,
    pub enabled: bool,
    pub performance: PerformanceView,
    pub thresholds: ThresholdView,
    pub multipliers: MultiplierView,
    pub activation: Option<ActivationView>,
    pub last_check_at: Option<DateTime<Utc>>,
    /// Most recent swallowed failure, cleared by the next successful operation.
    pub last_error: Option<String>,
}
