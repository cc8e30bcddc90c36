//! Signal types produced by the confluence pipeline.
//!
//! [`ComponentScore`] is what one indicator category emits,
//! [`CompositeSignal`] is what the aggregator emits, and
//! [`TradeParameters`] is what the stop-loss calculator derives from it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DegradedComputation;
use crate::market::Timeframe;

/// Neutral score on the 0-100 scale.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Bullish signal - expect price to go up
    Buy,
    /// Bearish signal - expect price to go down
    Sell,
    /// No directional bias
    Neutral,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Neutral => Self::Neutral,
        }
    }

    /// Returns true if this direction has a directional bias.
    #[must_use]
    pub const fn is_directional(self) -> bool {
        !matches!(self, Self::Neutral)
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Neutral => "NEUTRAL",
        }
    }

    /// Parses from string representation. Accepts LONG/SHORT aliases.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Some(Self::Buy),
            "SELL" | "SHORT" => Some(Self::Sell),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technical,
    Volume,
    Orderflow,
    Orderbook,
    Sentiment,
    PriceStructure,
}

impl Category {
    /// Every category, in aggregation order.
    pub const ALL: [Category; 6] = [
        Self::Technical,
        Self::Volume,
        Self::Orderflow,
        Self::Orderbook,
        Self::Sentiment,
        Self::PriceStructure,
    ];

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Volume => "volume",
            Self::Orderflow => "orderflow",
            Self::Orderbook => "orderbook",
            Self::Sentiment => "sentiment",
            Self::PriceStructure => "price_structure",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }

    /// True for categories scored separately on every configured timeframe.
    #[must_use]
    pub fn is_multi_timeframe(&self) -> bool {
        matches!(self, Self::Technical | Self::Volume | Self::PriceStructure)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction implied by a price/flow divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceKind {
    /// Flow strengthening while price lags
    Bullish,
    /// Flow weakening while price holds up
    Bearish,
}

/// Bounded score adjustment from a detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceBonus {
    pub kind: DivergenceKind,
    /// Adjustment size in score points, always >= 0
    pub magnitude: f64,
    /// Latest rolling correlation
    pub correlation: f64,
    /// Mean of the earlier rolling correlations
    pub historical_mean: f64,
}

impl DivergenceBonus {
    /// Signed adjustment: positive for bullish, negative for bearish.
    #[must_use]
    pub fn signed(&self) -> f64 {
        match self.kind {
            DivergenceKind::Bullish => self.magnitude,
            DivergenceKind::Bearish => -self.magnitude,
        }
    }
}

/// Output of one indicator category for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub category: Category,
    /// Combined category score in [0, 100]
    pub score: f64,
    /// Named sub-metric scores in [0, 100]
    #[serde(default)]
    pub sub_scores: BTreeMap<String, f64>,
    /// Raw diagnostic values behind the sub-scores
    #[serde(default)]
    pub diagnostics: BTreeMap<String, f64>,
    /// Per-timeframe scores for multi-timeframe categories
    #[serde(default)]
    pub timeframe_scores: BTreeMap<Timeframe, f64>,
    pub divergence: Option<DivergenceBonus>,
    #[serde(default)]
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl ComponentScore {
    /// Creates a score with no sub-metrics.
    #[must_use]
    pub fn new(category: Category, score: f64) -> Self {
        Self {
            category,
            score,
            sub_scores: BTreeMap::new(),
            diagnostics: BTreeMap::new(),
            timeframe_scores: BTreeMap::new(),
            divergence: None,
            degraded: false,
            degraded_reason: None,
        }
    }

    /// Neutral score flagged as degraded.
    #[must_use]
    pub fn degraded(category: Category, reason: &DegradedComputation) -> Self {
        let mut score = Self::new(category, NEUTRAL_SCORE);
        score.degraded = true;
        score.degraded_reason = Some(reason.to_string());
        score
    }

    #[must_use]
    pub fn with_sub_score(mut self, name: impl Into<String>, score: f64) -> Self {
        self.sub_scores.insert(name.into(), score);
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, name: impl Into<String>, value: f64) -> Self {
        self.diagnostics.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_timeframe_scores(mut self, scores: BTreeMap<Timeframe, f64>) -> Self {
        self.timeframe_scores = scores;
        self
    }

    #[must_use]
    pub fn with_divergence(mut self, bonus: Option<DivergenceBonus>) -> Self {
        self.divergence = bonus;
        self
    }
}

/// How one category contributed to a composite signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    /// Category score after timeframe combination
    pub score: f64,
    /// Weight from configuration
    pub configured_weight: f64,
    /// Weight after renormalization over valid categories (0 if failed)
    pub effective_weight: f64,
    /// `score * effective_weight`
    pub contribution: f64,
    pub degraded: bool,
    pub reason: Option<String>,
    #[serde(default)]
    pub timeframe_scores: BTreeMap<Timeframe, f64>,
}

/// Directional output of the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub symbol: String,
    pub direction: Direction,
    /// Composite score in [0, 100]
    pub score: f64,
    pub components: BTreeMap<Category, CategoryBreakdown>,
    pub interpretation: String,
    /// Categories that failed, were degraded, or were missing
    pub degraded_categories: Vec<Category>,
    pub degraded: bool,
    /// Set when no category produced a usable score
    pub error: Option<String>,
    /// Total divergence adjustment applied, in score points
    pub divergence_adjustment: f64,
    /// Fraction of configured weight backed by valid categories
    pub reliability: f64,
    /// Version of the configuration the signal was computed with
    pub config_version: u64,
    pub timestamp: DateTime<Utc>,
}

impl CompositeSignal {
    /// Sum of effective weights; 1.0 whenever at least one category is valid.
    #[must_use]
    pub fn effective_weight_sum(&self) -> f64 {
        self.components.values().map(|c| c.effective_weight).sum()
    }

    /// True if a stop loss can be derived from this signal.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.direction.is_directional() && self.error.is_none()
    }
}

/// One profit target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPrice {
    /// Multiple of the stop distance
    pub risk_multiple: f64,
    pub price: f64,
    /// Distance from entry in percent
    pub pct: f64,
}

/// Risk parameters derived from a composite signal and an entry price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeParameters {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    /// Stop distance in percent of entry
    pub stop_loss_pct: f64,
    pub targets: Vec<TargetPrice>,
    /// Normalized confidence in [0, 1] used for sizing the stop
    pub confidence: f64,
    /// True if the sanity bound changed the stop
    pub out_of_range: bool,
    /// Stop before the sanity bound was applied
    pub unbounded_stop_pct: f64,
}
