//! Application and scoring configuration.
//!
//! Everything here deserializes with defaults, so a partial `Config.toml`
//! (or none at all) yields a working configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::market::Timeframe;
use crate::signal::{Category, Direction};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scoring: ScoringConfig,
    pub governor: GovernorConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.scoring.validate()?;
        self.governor.validate()?;
        self.pipeline.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/confluence".to_string(),
            max_connections: 10,
        }
    }
}

/// Monitoring loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    pub cycle_interval_secs: u64,
    /// Per-instrument deadline for one cycle
    pub cycle_timeout_secs: u64,
    /// Upper bound on instruments processed concurrently
    pub max_concurrent_instruments: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            cycle_interval_secs: 60,
            cycle_timeout_secs: 20,
            max_concurrent_instruments: 4,
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// Returns an error for zero timeouts or zero concurrency.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cycle_timeout_secs == 0 || self.cycle_interval_secs == 0 {
            return Err(ValidationError::invalid_config(
                "pipeline interval and timeout must be positive",
            ));
        }
        if self.max_concurrent_instruments == 0 {
            return Err(ValidationError::invalid_config(
                "pipeline.max_concurrent_instruments must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Live scoring parameters read by the aggregator and stop-loss calculator.
///
/// Published as immutable versions through [`crate::ConfigStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub category_weights: BTreeMap<Category, f64>,
    pub timeframe_weights: BTreeMap<Timeframe, f64>,
    pub thresholds: SignalThresholds,
    pub divergence: DivergenceConfig,
    pub indicators: IndicatorSettings,
    pub regime: RegimeSettings,
    pub stop_loss: StopLossConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let category_weights = BTreeMap::from([
            (Category::Technical, 0.20),
            (Category::Volume, 0.10),
            (Category::Orderflow, 0.25),
            (Category::Orderbook, 0.20),
            (Category::Sentiment, 0.10),
            (Category::PriceStructure, 0.15),
        ]);
        let timeframe_weights = BTreeMap::from([
            (Timeframe::M1, 0.40),
            (Timeframe::M5, 0.30),
            (Timeframe::M30, 0.20),
            (Timeframe::H4, 0.10),
        ]);
        Self {
            category_weights,
            timeframe_weights,
            thresholds: SignalThresholds::default(),
            divergence: DivergenceConfig::default(),
            indicators: IndicatorSettings::default(),
            regime: RegimeSettings::default(),
            stop_loss: StopLossConfig::default(),
        }
    }
}

impl ScoringConfig {
    /// Configured weight for a category (0 if absent).
    #[must_use]
    pub fn category_weight(&self, category: Category) -> f64 {
        self.category_weights.get(&category).copied().unwrap_or(0.0)
    }

    /// Timeframes that carry a positive weight, shortest first.
    #[must_use]
    pub fn weighted_timeframes(&self) -> Vec<Timeframe> {
        self.timeframe_weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(tf, _)| *tf)
            .collect()
    }

    /// # Errors
    /// Returns an error if weights do not sum to 1.0, thresholds overlap, or
    /// any nested section is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_weights("category_weights", self.category_weights.values())?;
        let sum: f64 = self.category_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ValidationError::invalid_config(format!(
                "category_weights must sum to 1.0, got {sum:.4}"
            )));
        }
        validate_weights("timeframe_weights", self.timeframe_weights.values())?;
        self.thresholds.validate()?;
        self.divergence.validate()?;
        self.indicators.validate()?;
        self.stop_loss.validate()
    }
}

fn validate_weights<'a>(
    name: &str,
    weights: impl Iterator<Item = &'a f64>,
) -> Result<(), ValidationError> {
    let mut total = 0.0;
    for w in weights {
        if !w.is_finite() || *w < 0.0 {
            return Err(ValidationError::invalid_config(format!(
                "{name} must be finite and non-negative, got {w}"
            )));
        }
        total += w;
    }
    if total <= 0.0 {
        return Err(ValidationError::invalid_config(format!(
            "{name} must contain a positive weight"
        )));
    }
    Ok(())
}

/// Buy/sell thresholds on the composite score, with a neutral band between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalThresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            buy: 60.0,
            sell: 40.0,
        }
    }
}

impl SignalThresholds {
    /// # Errors
    /// Returns an error unless `0 <= sell < buy <= 100`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.buy.is_finite() && self.sell.is_finite())
            || self.sell < 0.0
            || self.buy > 100.0
            || self.sell >= self.buy
        {
            return Err(ValidationError::invalid_config(format!(
                "thresholds require 0 <= sell < buy <= 100, got sell={} buy={}",
                self.sell, self.buy
            )));
        }
        Ok(())
    }
}

/// Rolling-correlation divergence detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Observations per rolling correlation window
    pub window: usize,
    /// Correlation drop below the historical mean that counts as divergence
    pub drop_threshold: f64,
    /// Largest bonus one category may attach
    pub max_bonus: f64,
    /// Largest total adjustment applied to the composite
    pub max_total_bonus: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            window: 10,
            drop_threshold: 0.4,
            max_bonus: 5.0,
            max_total_bonus: 10.0,
        }
    }
}

impl DivergenceConfig {
    /// # Errors
    /// Returns an error for windows below 3 or negative bonuses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.window < 3 {
            return Err(ValidationError::invalid_config("divergence.window must be >= 3"));
        }
        if !(self.drop_threshold > 0.0 && self.max_bonus >= 0.0 && self.max_total_bonus >= 0.0) {
            return Err(ValidationError::invalid_config(
                "divergence thresholds and bonuses must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Look-back periods and minimum history for the indicator families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    /// Candles required before a timeframe is scored
    pub min_candles: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub volume_baseline_period: usize,
    pub money_flow_period: usize,
    pub structure_lookback: usize,
    /// Timeframe used for regime detection and divergence
    pub primary_timeframe: Timeframe,
    pub orderbook_depth: usize,
    /// Band around the mid price for depth ratios, in basis points
    pub depth_band_bps: f64,
    /// Level size, as a multiple of the average level, that counts as a wall
    pub wall_multiple: f64,
    pub min_trades: usize,
    /// Quantile of trade size above which a print counts as large
    pub large_trade_quantile: f64,
    /// Number of buckets the trade tape is split into for flow series
    pub flow_buckets: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            min_candles: 35,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            ema_fast: 9,
            ema_slow: 21,
            atr_period: 14,
            volume_baseline_period: 20,
            money_flow_period: 14,
            structure_lookback: 30,
            primary_timeframe: Timeframe::M5,
            orderbook_depth: 10,
            depth_band_bps: 50.0,
            wall_multiple: 4.0,
            min_trades: 20,
            large_trade_quantile: 0.9,
            flow_buckets: 24,
        }
    }
}

impl IndicatorSettings {
    /// # Errors
    /// Returns an error if periods are zero or inconsistent with `min_candles`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let periods = [
            self.rsi_period,
            self.macd_fast,
            self.macd_slow,
            self.macd_signal,
            self.ema_fast,
            self.ema_slow,
            self.atr_period,
            self.volume_baseline_period,
            self.money_flow_period,
            self.structure_lookback,
            self.orderbook_depth,
            self.flow_buckets,
        ];
        if periods.contains(&0) {
            return Err(ValidationError::invalid_config("indicator periods must be positive"));
        }
        if self.macd_fast >= self.macd_slow || self.ema_fast >= self.ema_slow {
            return Err(ValidationError::invalid_config(
                "fast periods must be shorter than slow periods",
            ));
        }
        if self.min_candles < self.macd_slow + self.macd_signal {
            return Err(ValidationError::invalid_config(format!(
                "min_candles ({}) must cover macd_slow + macd_signal ({})",
                self.min_candles,
                self.macd_slow + self.macd_signal
            )));
        }
        if !(0.0..1.0).contains(&self.large_trade_quantile) || self.wall_multiple <= 1.0 {
            return Err(ValidationError::invalid_config(
                "large_trade_quantile must be in [0, 1) and wall_multiple above 1",
            ));
        }
        if self.flow_buckets < 6 {
            return Err(ValidationError::invalid_config("flow_buckets must be >= 6"));
        }
        Ok(())
    }
}

/// Regime classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    pub adx_period: usize,
    /// ADX at or above this is a trend
    pub adx_trend_threshold: f64,
    /// Current ATR / average ATR at or above this is a volatile market
    pub volatility_ratio_high: f64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            adx_period: 14,
            adx_trend_threshold: 25.0,
            volatility_ratio_high: 1.8,
        }
    }
}

/// Confidence-scaling multipliers applied to a base stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopMultipliers {
    pub min: f64,
    pub max: f64,
}

impl StopMultipliers {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// # Errors
    /// Returns an error unless `0 < min <= max`.
    pub fn validate(&self, name: &str) -> Result<(), ValidationError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min <= 0.0 || self.min > self.max
        {
            return Err(ValidationError::invalid_config(format!(
                "{name} multipliers require 0 < min <= max, got min={} max={}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Stop sizing for one trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalStop {
    /// Base stop distance in percent
    pub base_pct: f64,
    /// Score the signal must cross before confidence tightens the stop
    pub threshold: f64,
    pub multipliers: StopMultipliers,
}

impl DirectionalStop {
    /// Tightest stop: `base * min_multiplier`.
    #[must_use]
    pub fn min_stop(&self) -> f64 {
        self.base_pct * self.multipliers.min
    }

    /// Widest stop: `base * max_multiplier`.
    #[must_use]
    pub fn max_stop(&self) -> f64 {
        self.base_pct * self.multipliers.max
    }

    fn validate(&self, name: &str) -> Result<(), ValidationError> {
        if !(self.base_pct.is_finite() && self.base_pct > 0.0) {
            return Err(ValidationError::invalid_config(format!(
                "{name}.base_pct must be positive"
            )));
        }
        if !(self.threshold > 0.0 && self.threshold < 100.0) {
            return Err(ValidationError::invalid_config(format!(
                "{name}.threshold must be strictly between 0 and 100"
            )));
        }
        self.multipliers.validate(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLossConfig {
    pub long: DirectionalStop,
    pub short: DirectionalStop,
    /// Absolute sanity floor for any stop, in percent
    pub min_stop_pct: f64,
    /// Absolute sanity ceiling for any stop, in percent
    pub max_stop_pct: f64,
    /// Profit targets as multiples of the stop distance
    pub target_risk_multiples: Vec<f64>,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            long: DirectionalStop {
                base_pct: 3.0,
                threshold: 70.0,
                multipliers: StopMultipliers::new(0.8, 1.5),
            },
            short: DirectionalStop {
                base_pct: 3.5,
                threshold: 30.0,
                multipliers: StopMultipliers::new(0.8, 1.5),
            },
            min_stop_pct: 0.5,
            max_stop_pct: 10.0,
            target_risk_multiples: vec![1.5, 2.5, 4.0],
        }
    }
}

impl StopLossConfig {
    /// Settings for a trade direction. `None` for NEUTRAL.
    #[must_use]
    pub fn for_direction(&self, direction: Direction) -> Option<&DirectionalStop> {
        match direction {
            Direction::Buy => Some(&self.long),
            Direction::Sell => Some(&self.short),
            Direction::Neutral => None,
        }
    }

    /// Replaces the multipliers for a direction. NEUTRAL is ignored.
    pub fn set_multipliers(&mut self, direction: Direction, multipliers: StopMultipliers) {
        match direction {
            Direction::Buy => self.long.multipliers = multipliers,
            Direction::Sell => self.short.multipliers = multipliers,
            Direction::Neutral => {}
        }
    }

    /// # Errors
    /// Returns an error for invalid directional settings or sanity bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.long.validate("stop_loss.long")?;
        self.short.validate("stop_loss.short")?;
        if !(self.min_stop_pct > 0.0 && self.min_stop_pct < self.max_stop_pct) {
            return Err(ValidationError::invalid_config(
                "stop_loss sanity range requires 0 < min_stop_pct < max_stop_pct",
            ));
        }
        if self
            .target_risk_multiples
            .iter()
            .any(|m| !m.is_finite() || *m <= 0.0)
        {
            return Err(ValidationError::invalid_config(
                "target_risk_multiples must be positive",
            ));
        }
        Ok(())
    }
}

/// Kill-switch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    /// Direction whose realized performance is audited
    pub governed_direction: Direction,
    pub lookback_days: i64,
    pub min_closed_signals: usize,
    /// Activation when the win rate is strictly below this
    pub min_win_rate: f64,
    /// Minimum seconds between evaluations
    pub check_interval_secs: u64,
    /// Conservative multipliers restored on activation
    pub legacy_multipliers: StopMultipliers,
    /// Multipliers in force while monitoring
    pub enhanced_multipliers: StopMultipliers,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            governed_direction: Direction::Sell,
            lookback_days: 7,
            min_closed_signals: 20,
            min_win_rate: 0.35,
            check_interval_secs: 3600,
            legacy_multipliers: StopMultipliers::new(1.0, 1.0),
            enhanced_multipliers: StopMultipliers::new(0.8, 1.5),
        }
    }
}

impl GovernorConfig {
    /// # Errors
    /// Returns an error for a neutral governed direction or out-of-range thresholds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.governed_direction.is_directional() {
            return Err(ValidationError::UnsupportedDirection(
                self.governed_direction.to_string(),
            ));
        }
        if self.lookback_days <= 0 || self.min_closed_signals == 0 {
            return Err(ValidationError::invalid_config(
                "governor lookback_days and min_closed_signals must be positive",
            ));
        }
        if !(self.min_win_rate > 0.0 && self.min_win_rate < 1.0) {
            return Err(ValidationError::invalid_config(
                "governor.min_win_rate must be in (0, 1)",
            ));
        }
        self.legacy_multipliers.validate("governor.legacy")?;
        self.enhanced_multipliers.validate("governor.enhanced")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn default_category_weights_sum_to_one() {
        let cfg = ScoringConfig::default();
        let sum: f64 = cfg.category_weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weights_not_summing_to_one_rejected() {
        let mut cfg = ScoringConfig::default();
        cfg.category_weights.insert(Category::Technical, 0.9);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = ScoringConfig::default();
        cfg.timeframe_weights.insert(Timeframe::H1, -0.1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overlapping_thresholds_rejected() {
        let thresholds = SignalThresholds {
            buy: 45.0,
            sell: 55.0,
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn stop_threshold_at_hundred_rejected() {
        let mut cfg = StopLossConfig::default();
        cfg.long.threshold = 100.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn min_max_stop_follow_multipliers() {
        let cfg = StopLossConfig::default();
        assert!((cfg.long.min_stop() - 2.4).abs() < 1e-9);
        assert!((cfg.long.max_stop() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn set_multipliers_only_touches_direction() {
        let mut cfg = StopLossConfig::default();
        cfg.set_multipliers(Direction::Sell, StopMultipliers::new(1.0, 1.0));
        assert_eq!(cfg.short.multipliers, StopMultipliers::new(1.0, 1.0));
        assert_eq!(cfg.long.multipliers, StopMultipliers::new(0.8, 1.5));
    }

    #[test]
    fn governor_neutral_direction_rejected() {
        let cfg = GovernorConfig {
            governed_direction: Direction::Neutral,
            ..GovernorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"governor": {"min_win_rate": 0.4}}"#).unwrap();
        assert!((cfg.governor.min_win_rate - 0.4).abs() < f64::EPSILON);
        assert_eq!(cfg.governor.min_closed_signals, 20);
        assert_eq!(cfg.scoring, ScoringConfig::default());
    }
}
