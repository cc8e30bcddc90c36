//! Confluence aggregator.
//!
//! Fuses per-category outcomes into one [`CompositeSignal`]. Categories that
//! failed, degraded, or never reported are excluded and the remaining
//! configured weights renormalize to 1.0. Losing every category is not an
//! error: the result is a neutral, degraded signal with an error marker.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use confluence_core::{
    Category, CategoryBreakdown, ComponentScore, CompositeSignal, ConfigVersion, Direction,
    MarketSnapshot, ScoringConfig, ValidationError, NEUTRAL_SCORE,
};

use crate::indicator::combine_timeframes;
use crate::interpretation::interpret;
use crate::registry::{CategoryOutcome, IndicatorRegistry};

/// Error marker set when no category produced a usable score.
pub const ALL_CATEGORIES_FAILED: &str = "all indicator categories failed";

#[derive(Debug, Clone, Default)]
pub struct ConfluenceAggregator {
    registry: IndicatorRegistry,
}

/// A category that made it into the weighted sum.
struct ValidCategory {
    score: f64,
    weight: f64,
    bonus: f64,
}

impl ConfluenceAggregator {
    #[must_use]
    pub fn new(registry: IndicatorRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &IndicatorRegistry {
        &self.registry
    }

    /// Computes every category for `snapshot` and aggregates the outcomes.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if the configuration or an indicator's
    /// output violates its contract.
    pub fn analyze(
        &self,
        snapshot: &MarketSnapshot,
        config: &ConfigVersion,
    ) -> Result<CompositeSignal, ValidationError> {
        config.scoring.validate()?;
        let outcomes = self.registry.compute_all(snapshot, &config.scoring);
        Self::aggregate_at(&snapshot.symbol, &outcomes, config, snapshot.timestamp)
    }

    /// Aggregates category outcomes into a composite signal stamped now.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for invalid weights or thresholds, or a
    /// component score that is non-finite or outside [0, 100].
    pub fn aggregate(
        symbol: &str,
        outcomes: &BTreeMap<Category, CategoryOutcome>,
        config: &ConfigVersion,
    ) -> Result<CompositeSignal, ValidationError> {
        Self::aggregate_at(symbol, outcomes, config, Utc::now())
    }

    /// # Errors
    /// See [`ConfluenceAggregator::aggregate`].
    pub fn aggregate_at(
        symbol: &str,
        outcomes: &BTreeMap<Category, CategoryOutcome>,
        config: &ConfigVersion,
        timestamp: DateTime<Utc>,
    ) -> Result<CompositeSignal, ValidationError> {
        let scoring = &config.scoring;
        scoring.validate()?;

        let mut components = BTreeMap::new();
        let mut valid: BTreeMap<Category, ValidCategory> = BTreeMap::new();
        let mut degraded_categories = Vec::new();
        let mut configured_total = 0.0;

        for (category, weight) in &scoring.category_weights {
            let (category, weight) = (*category, *weight);
            if weight <= 0.0 {
                continue;
            }
            configured_total += weight;

            let failure = match outcomes.get(&category) {
                None => Some((NEUTRAL_SCORE, "not computed".to_string(), BTreeMap::new())),
                Some(Err(e)) => Some((NEUTRAL_SCORE, e.to_string(), BTreeMap::new())),
                Some(Ok(component)) => {
                    validate_component(component)?;
                    if component.degraded {
                        let reason = component
                            .degraded_reason
                            .clone()
                            .unwrap_or_else(|| "degraded".to_string());
                        Some((component.score, reason, component.timeframe_scores.clone()))
                    } else {
                        let score = category_score(category, component, scoring);
                        let bonus = component.divergence.map_or(0.0, |d| {
                            d.signed()
                                .clamp(-scoring.divergence.max_bonus, scoring.divergence.max_bonus)
                        });
                        valid.insert(category, ValidCategory { score, weight, bonus });
                        components.insert(
                            category,
                            CategoryBreakdown {
                                score,
                                configured_weight: weight,
                                effective_weight: 0.0,
                                contribution: 0.0,
                                degraded: false,
                                reason: None,
                                timeframe_scores: component.timeframe_scores.clone(),
                            },
                        );
                        None
                    }
                }
            };

            if let Some((score, reason, timeframe_scores)) = failure {
                tracing::debug!(symbol, category = %category, reason = %reason, "Category excluded");
                degraded_categories.push(category);
                components.insert(
                    category,
                    CategoryBreakdown {
                        score,
                        configured_weight: weight,
                        effective_weight: 0.0,
                        contribution: 0.0,
                        degraded: true,
                        reason: Some(reason),
                        timeframe_scores,
                    },
                );
            }
        }

        let valid_weight: f64 = valid.values().map(|v| v.weight).sum();
        if valid.is_empty() || valid_weight <= 0.0 {
            tracing::warn!(symbol, "All indicator categories failed, emitting neutral signal");
            let interpretation = interpret(
                NEUTRAL_SCORE,
                Direction::Neutral,
                &components,
                0.0,
                &degraded_categories,
            );
            return Ok(CompositeSignal {
                symbol: symbol.to_string(),
                direction: Direction::Neutral,
                score: NEUTRAL_SCORE,
                components,
                interpretation,
                degraded_categories,
                degraded: true,
                error: Some(ALL_CATEGORIES_FAILED.to_string()),
                divergence_adjustment: 0.0,
                reliability: 0.0,
                config_version: config.version,
                timestamp,
            });
        }

        let mut base = 0.0;
        for (category, entry) in &valid {
            let effective_weight = entry.weight / valid_weight;
            let contribution = entry.score * effective_weight;
            base += contribution;
            if let Some(breakdown) = components.get_mut(category) {
                breakdown.effective_weight = effective_weight;
                breakdown.contribution = contribution;
            }
        }

        let max_total = scoring.divergence.max_total_bonus;
        let divergence_adjustment = valid
            .values()
            .map(|v| v.bonus)
            .sum::<f64>()
            .clamp(-max_total, max_total);
        let score = (base + divergence_adjustment).clamp(0.0, 100.0);
        let direction = direction_for(score, scoring);
        let degraded = !degraded_categories.is_empty();
        let interpretation = interpret(
            score,
            direction,
            &components,
            divergence_adjustment,
            &degraded_categories,
        );

        if degraded {
            tracing::warn!(
                symbol,
                score,
                degraded = ?degraded_categories,
                "Composite computed with degraded categories"
            );
        } else {
            tracing::debug!(symbol, score, direction = %direction, "Composite computed");
        }

        Ok(CompositeSignal {
            symbol: symbol.to_string(),
            direction,
            score,
            components,
            interpretation,
            degraded_categories,
            degraded,
            error: None,
            divergence_adjustment,
            reliability: valid_weight / configured_total,
            config_version: config.version,
            timestamp,
        })
    }
}

/// BUY strictly above the buy threshold, SELL strictly below the sell threshold.
#[must_use]
pub fn direction_for(score: f64, scoring: &ScoringConfig) -> Direction {
    if score > scoring.thresholds.buy {
        Direction::Buy
    } else if score < scoring.thresholds.sell {
        Direction::Sell
    } else {
        Direction::Neutral
    }
}

fn validate_score(score: f64) -> Result<(), ValidationError> {
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(())
    } else {
        Err(ValidationError::ScoreOutOfRange(score))
    }
}

fn validate_component(component: &ComponentScore) -> Result<(), ValidationError> {
    validate_score(component.score)?;
    for score in component.timeframe_scores.values() {
        validate_score(*score)?;
    }
    if let Some(bonus) = &component.divergence {
        if !bonus.magnitude.is_finite() {
            return Err(ValidationError::non_finite(format!(
                "{}.divergence.magnitude",
                component.category
            )));
        }
    }
    Ok(())
}

/// Recombines timeframe scores with the live timeframe weights for
/// multi-timeframe categories; other categories use their score as is.
fn category_score(category: Category, component: &ComponentScore, scoring: &ScoringConfig) -> f64 {
    if category.is_multi_timeframe() && !component.timeframe_scores.is_empty() {
        combine_timeframes(&component.timeframe_scores, &scoring.timeframe_weights)
            .unwrap_or(component.score)
    } else {
        component.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confluence_core::{DegradedComputation, DivergenceBonus, DivergenceKind, Timeframe};

    fn version() -> ConfigVersion {
        ConfigVersion::initial(ScoringConfig::default())
    }

    fn ok(category: Category, score: f64) -> (Category, CategoryOutcome) {
        (category, Ok(ComponentScore::new(category, score)))
    }

    fn all_at(score: f64) -> BTreeMap<Category, CategoryOutcome> {
        Category::ALL.iter().map(|c| ok(*c, score)).collect()
    }

    fn aggregate(outcomes: &BTreeMap<Category, CategoryOutcome>) -> CompositeSignal {
        ConfluenceAggregator::aggregate("BTCUSDT", outcomes, &version()).unwrap()
    }

    fn bonus(kind: DivergenceKind, magnitude: f64) -> DivergenceBonus {
        DivergenceBonus {
            kind,
            magnitude,
            correlation: -0.2,
            historical_mean: 0.6,
        }
    }

    #[test]
    fn uniform_scores_pass_through() {
        let signal = aggregate(&all_at(70.0));
        assert!((signal.score - 70.0).abs() < 1e-9);
        assert_eq!(signal.direction, Direction::Buy);
        assert!(!signal.degraded);
        assert!(signal.error.is_none());
        assert!((signal.effective_weight_sum() - 1.0).abs() < 1e-9);
        assert!((signal.reliability - 1.0).abs() < 1e-9);
        assert_eq!(signal.config_version, 1);
    }

    #[test]
    fn thresholds_are_strict() {
        // binary-exact weights keep the composite exactly on the threshold
        let mut scoring = ScoringConfig::default();
        scoring.category_weights = BTreeMap::from([
            (Category::Technical, 0.5),
            (Category::Orderflow, 0.25),
            (Category::Orderbook, 0.25),
        ]);
        let config = ConfigVersion::initial(scoring);
        let direction = |score: f64| {
            ConfluenceAggregator::aggregate("BTCUSDT", &all_at(score), &config)
                .unwrap()
                .direction
        };
        assert_eq!(direction(60.0), Direction::Neutral);
        assert_eq!(direction(40.0), Direction::Neutral);
        assert_eq!(direction(60.5), Direction::Buy);
        assert_eq!(direction(39.5), Direction::Sell);
    }

    #[test]
    fn weights_follow_configuration() {
        let mut outcomes = all_at(50.0);
        outcomes.insert(Category::Orderflow, Ok(ComponentScore::new(Category::Orderflow, 90.0)));
        let signal = aggregate(&outcomes);
        // orderflow carries 0.25 of the default weight
        assert!((signal.score - (50.0 + 0.25 * 40.0)).abs() < 1e-9);
        let breakdown = &signal.components[&Category::Orderflow];
        assert!((breakdown.contribution - 22.5).abs() < 1e-9);
    }

    #[test]
    fn failing_orderflow_is_excluded_and_weights_renormalize() {
        let mut outcomes = all_at(70.0);
        outcomes.insert(
            Category::Orderflow,
            Err(ValidationError::malformed("orderflow blew up")),
        );
        let signal = aggregate(&outcomes);

        assert!(signal.degraded);
        assert!(signal.error.is_none());
        assert_eq!(signal.degraded_categories, vec![Category::Orderflow]);
        assert!((signal.score - 70.0).abs() < 1e-9);
        assert!((signal.effective_weight_sum() - 1.0).abs() < 1e-9);
        assert!((signal.reliability - 0.75).abs() < 1e-9);

        let failed = &signal.components[&Category::Orderflow];
        assert!(failed.degraded);
        assert!(failed.effective_weight.abs() < f64::EPSILON);
        assert!(failed.reason.as_deref().unwrap().contains("orderflow blew up"));

        let technical = &signal.components[&Category::Technical];
        assert!((technical.effective_weight - 0.20 / 0.75).abs() < 1e-9);
    }

    #[test]
    fn degraded_and_missing_categories_are_excluded() {
        let mut outcomes = all_at(30.0);
        let reason = DegradedComputation::MissingInput("order book".into());
        outcomes.insert(
            Category::Orderbook,
            Ok(ComponentScore::degraded(Category::Orderbook, &reason)),
        );
        outcomes.remove(&Category::Sentiment);
        let signal = aggregate(&outcomes);

        assert_eq!(
            signal.degraded_categories,
            vec![Category::Orderbook, Category::Sentiment]
        );
        assert_eq!(signal.direction, Direction::Sell);
        assert!((signal.score - 30.0).abs() < 1e-9);
        assert_eq!(
            signal.components[&Category::Sentiment].reason.as_deref(),
            Some("not computed")
        );
    }

    #[test]
    fn all_failed_is_neutral_with_error_marker() {
        let outcomes: BTreeMap<Category, CategoryOutcome> = Category::ALL
            .iter()
            .map(|c| (*c, Err(ValidationError::malformed("bad"))))
            .collect();
        let signal = aggregate(&outcomes);

        assert_eq!(signal.direction, Direction::Neutral);
        assert!((signal.score - NEUTRAL_SCORE).abs() < f64::EPSILON);
        assert!(signal.degraded);
        assert_eq!(signal.error.as_deref(), Some(ALL_CATEGORIES_FAILED));
        assert_eq!(signal.degraded_categories.len(), Category::ALL.len());
        assert!(signal.reliability.abs() < f64::EPSILON);
        assert!(!signal.is_actionable());

        let empty = aggregate(&BTreeMap::new());
        assert_eq!(empty.error.as_deref(), Some(ALL_CATEGORIES_FAILED));
    }

    #[test]
    fn out_of_range_component_is_a_contract_violation() {
        for bad in [100.5, -1.0, f64::NAN, f64::INFINITY] {
            let mut outcomes = all_at(50.0);
            outcomes.insert(Category::Volume, Ok(ComponentScore::new(Category::Volume, bad)));
            let result = ConfluenceAggregator::aggregate("BTCUSDT", &outcomes, &version());
            assert!(matches!(result, Err(ValidationError::ScoreOutOfRange(_))));
        }
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let mut scoring = ScoringConfig::default();
        scoring.thresholds.buy = 30.0;
        let config = ConfigVersion::initial(scoring);
        let result = ConfluenceAggregator::aggregate("BTCUSDT", &all_at(50.0), &config);
        assert!(matches!(result, Err(ValidationError::InvalidConfig(_))));
    }

    #[test]
    fn divergence_bonus_is_bounded_and_clamped() {
        let mut outcomes = all_at(95.0);
        for category in [Category::Volume, Category::Orderflow, Category::Technical] {
            outcomes.insert(
                category,
                Ok(ComponentScore::new(category, 95.0)
                    .with_divergence(Some(bonus(DivergenceKind::Bullish, 8.0)))),
            );
        }
        let signal = aggregate(&outcomes);
        // each bonus capped at 5, total capped at 10, score capped at 100
        assert!((signal.divergence_adjustment - 10.0).abs() < 1e-9);
        assert!((signal.score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bearish_divergence_pulls_score_down() {
        let mut outcomes = all_at(62.0);
        outcomes.insert(
            Category::Volume,
            Ok(ComponentScore::new(Category::Volume, 62.0)
                .with_divergence(Some(bonus(DivergenceKind::Bearish, 3.0)))),
        );
        let signal = aggregate(&outcomes);
        assert!((signal.score - 59.0).abs() < 1e-9);
        assert_eq!(signal.direction, Direction::Neutral);
        assert!(signal.interpretation.contains("bearish divergence"));
    }

    #[test]
    fn divergence_from_failed_category_is_ignored() {
        let mut outcomes = all_at(50.0);
        let mut degraded = ComponentScore::degraded(
            Category::Volume,
            &DegradedComputation::Numeric("flat".into()),
        );
        degraded.divergence = Some(bonus(DivergenceKind::Bullish, 5.0));
        outcomes.insert(Category::Volume, Ok(degraded));
        let signal = aggregate(&outcomes);
        assert!(signal.divergence_adjustment.abs() < f64::EPSILON);
    }

    #[test]
    fn multi_timeframe_scores_use_live_timeframe_weights() {
        let mut outcomes = all_at(50.0);
        let technical = ComponentScore::new(Category::Technical, 50.0).with_timeframe_scores(
            BTreeMap::from([(Timeframe::M1, 80.0), (Timeframe::H4, 20.0)]),
        );
        outcomes.insert(Category::Technical, Ok(technical));
        let signal = aggregate(&outcomes);
        let expected = (0.40 * 80.0 + 0.10 * 20.0) / 0.50;
        assert!((signal.components[&Category::Technical].score - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_weight_categories_are_ignored() {
        let mut scoring = ScoringConfig::default();
        scoring.category_weights =
            BTreeMap::from([(Category::Technical, 1.0), (Category::Sentiment, 0.0)]);
        let config = ConfigVersion::initial(scoring);
        let outcomes = BTreeMap::from([ok(Category::Technical, 75.0)]);
        let signal = ConfluenceAggregator::aggregate("BTCUSDT", &outcomes, &config).unwrap();
        assert!(!signal.degraded);
        assert_eq!(signal.components.len(), 1);
        assert!((signal.score - 75.0).abs() < 1e-9);
    }

    #[test]
    fn analyze_runs_registry_and_stamps_snapshot_time() {
        use crate::indicator::fixtures;
        let snapshot = fixtures::all_timeframes(&fixtures::rising(80));
        let signal = ConfluenceAggregator::default()
            .analyze(&snapshot, &version())
            .unwrap();
        assert_eq!(signal.timestamp, snapshot.timestamp);
        assert!(signal.degraded);
        assert!(signal.degraded_categories.contains(&Category::Orderflow));
        assert!(signal.degraded_categories.contains(&Category::Orderbook));
        assert!((signal.effective_weight_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn analyze_rejects_invalid_config_before_computing() {
        let mut scoring = ScoringConfig::default();
        scoring.indicators.min_candles = 0;
        let config = ConfigVersion::initial(scoring);
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now())
            .with_candles(Timeframe::M1, Vec::new())
            .with_candles(Timeframe::M5, Vec::new());
        let err = ConfluenceAggregator::default()
            .analyze(&snapshot, &config)
            .unwrap_err();
        assert!(err.to_string().contains("min_candles"), "{err}");
    }
}
