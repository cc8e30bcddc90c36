//! Indicator categories.
//!
//! Every category turns a [`MarketSnapshot`] into a [`ComponentScore`]. The
//! set is closed: [`IndicatorKind`] names each variant and dispatches by match.
//!
//! Missing history or inputs never fail: the category reports a neutral,
//! degraded score. Only input no indicator could interpret is a
//! [`ValidationError`].

pub mod orderbook;
pub mod orderflow;
pub mod price_structure;
pub mod sentiment;
pub mod technical;
pub mod volume;

use std::collections::BTreeMap;

use confluence_core::{
    Candle, Category, ComponentScore, DegradedComputation, MarketSnapshot, ScoringConfig,
    Timeframe, ValidationError,
};

use crate::regime::MarketContext;
use crate::transform::{score_deviation, TransformParams};

pub use orderbook::OrderbookIndicator;
pub use orderflow::OrderflowIndicator;
pub use price_structure::PriceStructureIndicator;
pub use sentiment::SentimentIndicator;
pub use technical::TechnicalIndicator;
pub use volume::VolumeIndicator;

/// Capability shared by every indicator category.
pub trait Indicator {
    fn category(&self) -> Category;

    /// Scores the snapshot using a precomputed market context.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for structurally invalid input.
    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError>;

    /// Scores the snapshot.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for structurally invalid input.
    fn compute(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
    ) -> Result<ComponentScore, ValidationError> {
        let ctx = MarketContext::analyze(snapshot, config);
        self.compute_with(snapshot, config, &ctx)
    }
}

/// The closed set of indicator variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Technical(TechnicalIndicator),
    Volume(VolumeIndicator),
    Orderflow(OrderflowIndicator),
    Orderbook(OrderbookIndicator),
    Sentiment(SentimentIndicator),
    PriceStructure(PriceStructureIndicator),
}

impl IndicatorKind {
    /// One indicator per category.
    #[must_use]
    pub fn all() -> Vec<Self> {
        Category::ALL.iter().map(|c| Self::for_category(*c)).collect()
    }

    #[must_use]
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Technical => Self::Technical(TechnicalIndicator),
            Category::Volume => Self::Volume(VolumeIndicator),
            Category::Orderflow => Self::Orderflow(OrderflowIndicator),
            Category::Orderbook => Self::Orderbook(OrderbookIndicator),
            Category::Sentiment => Self::Sentiment(SentimentIndicator),
            Category::PriceStructure => Self::PriceStructure(PriceStructureIndicator),
        }
    }
}

impl Indicator for IndicatorKind {
    fn category(&self) -> Category {
        match self {
            Self::Technical(i) => i.category(),
            Self::Volume(i) => i.category(),
            Self::Orderflow(i) => i.category(),
            Self::Orderbook(i) => i.category(),
            Self::Sentiment(i) => i.category(),
            Self::PriceStructure(i) => i.category(),
        }
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        match self {
            Self::Technical(i) => i.compute_with(snapshot, config, ctx),
            Self::Volume(i) => i.compute_with(snapshot, config, ctx),
            Self::Orderflow(i) => i.compute_with(snapshot, config, ctx),
            Self::Orderbook(i) => i.compute_with(snapshot, config, ctx),
            Self::Sentiment(i) => i.compute_with(snapshot, config, ctx),
            Self::PriceStructure(i) => i.compute_with(snapshot, config, ctx),
        }
    }
}

/// Weighted sub-metric scores for one category (or one timeframe of it).
#[derive(Debug, Clone)]
pub(crate) struct SubScores {
    intensity: f64,
    entries: Vec<SubScore>,
}

#[derive(Debug, Clone)]
struct SubScore {
    name: &'static str,
    raw: f64,
    score: f64,
    weight: f64,
}

impl SubScores {
    pub(crate) fn new(intensity: f64) -> Self {
        Self {
            intensity,
            entries: Vec::new(),
        }
    }

    /// Transforms `raw` and records it.
    pub(crate) fn push(
        &mut self,
        name: &'static str,
        raw: f64,
        params: &TransformParams,
        weight: f64,
    ) -> Result<(), ValidationError> {
        let score = score_deviation(raw, params, self.intensity)?;
        self.entries.push(SubScore {
            name,
            raw,
            score,
            weight,
        });
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weighted mean of the recorded scores.
    pub(crate) fn blended(&self) -> Option<f64> {
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        if total <= 0.0 {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|e| e.score * e.weight).sum();
        Some((sum / total).clamp(0.0, 100.0))
    }

    /// Copies sub-scores and raw values into `component`, keyed by `prefix.name`
    /// when a prefix is given.
    pub(crate) fn record(&self, mut component: ComponentScore, prefix: Option<&str>) -> ComponentScore {
        for e in &self.entries {
            let key = match prefix {
                Some(p) => format!("{p}.{}", e.name),
                None => e.name.to_string(),
            };
            component.diagnostics.insert(key.clone(), e.raw);
            component.sub_scores.insert(key, e.score);
        }
        component
    }
}

/// Combines per-timeframe scores with the configured timeframe weights,
/// renormalized over the timeframes present.
#[must_use]
pub fn combine_timeframes(
    scores: &BTreeMap<Timeframe, f64>,
    weights: &BTreeMap<Timeframe, f64>,
) -> Option<f64> {
    let mut total = 0.0;
    let mut sum = 0.0;
    for (tf, score) in scores {
        let w = weights.get(tf).copied().unwrap_or(0.0);
        if w > 0.0 {
            total += w;
            sum += w * score;
        }
    }
    (total > 0.0).then(|| sum / total)
}

/// Scores each weighted timeframe with enough history and combines them.
pub(crate) fn score_timeframes<F>(
    snapshot: &MarketSnapshot,
    config: &ScoringConfig,
    category: Category,
    mut score_one: F,
) -> Result<ComponentScore, ValidationError>
where
    F: FnMut(&[Candle]) -> Result<SubScores, ValidationError>,
{
    let min = config.indicators.min_candles;
    let mut timeframe_scores = BTreeMap::new();
    let mut component = ComponentScore::new(category, 0.0);
    let mut longest = 0;

    for tf in config.weighted_timeframes() {
        let Some(candles) = snapshot.candles(tf) else {
            continue;
        };
        longest = longest.max(candles.len());
        if candles.len() < min {
            continue;
        }
        let subs = score_one(candles)?;
        if let Some(score) = subs.blended() {
            timeframe_scores.insert(tf, score);
            component = subs.record(component, Some(tf.as_str()));
        }
    }

    let Some(score) = combine_timeframes(&timeframe_scores, &config.timeframe_weights) else {
        let reason = DegradedComputation::InsufficientHistory {
            required: min,
            available: longest,
        };
        tracing::debug!(symbol = %snapshot.symbol, category = %category, %reason, "Category degraded");
        return Ok(ComponentScore::degraded(category, &reason));
    };

    component.score = score;
    Ok(component.with_timeframe_scores(timeframe_scores))
}

/// Builds a single-snapshot component, or a degraded one when nothing scored.
pub(crate) fn finish(
    snapshot: &MarketSnapshot,
    category: Category,
    subs: &SubScores,
    missing: impl FnOnce() -> DegradedComputation,
) -> ComponentScore {
    match subs.blended() {
        Some(score) => subs.record(ComponentScore::new(category, score), None),
        None => {
            let reason = missing();
            tracing::debug!(symbol = %snapshot.symbol, category = %category, %reason, "Category degraded");
            ComponentScore::degraded(category, &reason)
        }
    }
}

/// Candles on the context timeframe, else the primary timeframe.
pub(crate) fn context_series<'a>(
    snapshot: &'a MarketSnapshot,
    config: &ScoringConfig,
    ctx: &MarketContext,
) -> Option<&'a [Candle]> {
    let tf = ctx.timeframe.unwrap_or(config.indicators.primary_timeframe);
    snapshot.candles(tf)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_category_once() {
        let kinds = IndicatorKind::all();
        assert_eq!(kinds.len(), Category::ALL.len());
        for (kind, category) in kinds.iter().zip(Category::ALL) {
            assert_eq!(kind.category(), category);
        }
    }

    #[test]
    fn combine_timeframes_renormalizes_over_present() {
        let weights = BTreeMap::from([(Timeframe::M1, 0.4), (Timeframe::M5, 0.3), (Timeframe::H4, 0.3)]);
        let scores = BTreeMap::from([(Timeframe::M1, 80.0), (Timeframe::M5, 40.0)]);
        let combined = combine_timeframes(&scores, &weights).unwrap();
        assert!((combined - (0.4 * 80.0 + 0.3 * 40.0) / 0.7).abs() < 1e-9);
    }

    #[test]
    fn combine_timeframes_ignores_unweighted() {
        let weights = BTreeMap::from([(Timeframe::M1, 1.0)]);
        let scores = BTreeMap::from([(Timeframe::D1, 90.0)]);
        assert!(combine_timeframes(&scores, &weights).is_none());
    }

    #[test]
    fn sub_scores_blend_by_weight() {
        let params = TransformParams::symmetric(1.0, 2.0, 3.0);
        let mut subs = SubScores::new(1.0);
        subs.push("up", 1.0, &params, 3.0).unwrap();
        subs.push("flat", 0.0, &params, 1.0).unwrap();
        let up = score_deviation(1.0, &params, 1.0).unwrap();
        assert!((subs.blended().unwrap() - (3.0 * up + 50.0) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn empty_sub_scores_do_not_blend() {
        assert!(SubScores::new(1.0).blended().is_none());
    }

    #[test]
    fn short_history_degrades_instead_of_failing() {
        let snapshot = fixtures::all_timeframes(&fixtures::rising(10));
        for kind in IndicatorKind::all() {
            let score = kind.compute(&snapshot, &ScoringConfig::default()).unwrap();
            assert!(score.degraded, "{} should degrade", kind.category());
            assert!((score.score - 50.0).abs() < f64::EPSILON);
        }
    }
}
