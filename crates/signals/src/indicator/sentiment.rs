//! Derivatives positioning, read contrarian.
//!
//! Crowded funding and a lopsided long/short ratio point against the crowd.
//! Open-interest growth counts in the direction price is moving. Without
//! positioning data the score falls back to a risk-appetite proxy:
//! log momentum over the structure lookback divided by its own volatility.

use confluence_core::{
    stats, Candle, Category, ComponentScore, DegradedComputation, MarketSnapshot, ScoringConfig,
    SentimentInputs, ValidationError,
};

use super::{context_series, finish, Indicator, SubScores};
use crate::regime::MarketContext;
use crate::transform::TransformParams;

const FUNDING_ZSCORE: TransformParams = TransformParams::symmetric(1.0, 2.0, 3.5).inverse();
/// Raw funding in basis points per interval
const FUNDING_BPS: TransformParams = TransformParams::symmetric(1.0, 3.0, 8.0).inverse();
/// Natural log of longs over shorts
const LONG_SHORT: TransformParams = TransformParams::symmetric(0.15, 0.4, 0.8).inverse();
/// Open-interest change in percent, signed by price direction
const OPEN_INTEREST: TransformParams = TransformParams::symmetric(2.0, 5.0, 10.0);
const RISK_APPETITE: TransformParams = TransformParams::symmetric(0.5, 1.5, 3.0);

/// Funding observations needed before the z-score replaces raw funding.
const MIN_FUNDING_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SentimentIndicator;

impl Indicator for SentimentIndicator {
    fn category(&self) -> Category {
        Category::Sentiment
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        let candles = context_series(snapshot, config, ctx);
        let lookback = config.indicators.structure_lookback;
        let mut subs = SubScores::new(ctx.intensity);

        if let Some(inputs) = snapshot.sentiment.as_ref().filter(|s| !s.is_empty()) {
            score_positioning(inputs, candles, lookback, &mut subs)?;
        }

        let mut proxy = false;
        if subs.is_empty() {
            if let Some(candles) = candles.filter(|c| c.len() >= config.indicators.min_candles) {
                if let Some(appetite) = risk_appetite(candles, lookback) {
                    subs.push("risk_appetite", appetite, &RISK_APPETITE, 1.0)?;
                    proxy = true;
                }
            }
        }

        let component = finish(snapshot, Category::Sentiment, &subs, || {
            DegradedComputation::MissingInput("sentiment inputs or price history".to_string())
        });
        if proxy {
            return Ok(component.with_diagnostic("price_proxy", 1.0));
        }
        Ok(component)
    }
}

fn score_positioning(
    inputs: &SentimentInputs,
    candles: Option<&[Candle]>,
    lookback: usize,
    subs: &mut SubScores,
) -> Result<(), ValidationError> {
    if let Some(rate) = inputs.funding_rate {
        let zscore = (inputs.funding_history.len() >= MIN_FUNDING_HISTORY)
            .then(|| stats::zscore(&inputs.funding_history, rate))
            .flatten();
        match zscore {
            Some(z) => subs.push("funding_zscore", z, &FUNDING_ZSCORE, 0.4)?,
            None => subs.push("funding_bps", rate * 10_000.0, &FUNDING_BPS, 0.4)?,
        }
    }

    if let Some(ratio) = inputs.long_short_ratio {
        if ratio <= 0.0 {
            return Err(ValidationError::malformed(format!(
                "long/short ratio must be positive, got {ratio}"
            )));
        }
        subs.push("long_short_ratio", ratio.ln(), &LONG_SHORT, 0.3)?;
    }

    let price_direction = candles.and_then(|c| price_direction(c, lookback));
    if let (Some(direction), [first, .., last]) = (price_direction, inputs.open_interest.as_slice())
    {
        if *first > 0.0 {
            let change_pct = (last / first - 1.0) * 100.0;
            subs.push("open_interest_change", change_pct * direction, &OPEN_INTEREST, 0.3)?;
        }
    }
    Ok(())
}

/// Sign of the close-to-close move over the lookback.
fn price_direction(candles: &[Candle], lookback: usize) -> Option<f64> {
    let last = candles.last()?.close;
    let start = candles[candles.len().saturating_sub(lookback + 1)].close;
    Some((last - start).signum())
}

/// Log return over `lookback` bars in units of the window's return volatility.
fn risk_appetite(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback < 2 || candles.len() <= lookback {
        return None;
    }
    let window = &candles[candles.len() - lookback - 1..];
    let log_returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect();
    let volatility = stats::std_dev(&log_returns)? * (log_returns.len() as f64).sqrt();
    let momentum: f64 = log_returns.iter().sum();
    if volatility > f64::EPSILON {
        Some(momentum / volatility)
    } else {
        Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::fixtures;
    use chrono::Utc;
    use confluence_core::Timeframe;

    fn with_inputs(inputs: SentimentInputs) -> MarketSnapshot {
        MarketSnapshot::new("BTCUSDT", Utc::now()).with_sentiment(inputs)
    }

    fn compute(snapshot: &MarketSnapshot) -> Result<ComponentScore, ValidationError> {
        SentimentIndicator.compute(snapshot, &ScoringConfig::default())
    }

    fn noisy_rise(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 * 1.003_f64.powi(i as i32) * if i % 2 == 0 { 1.001 } else { 0.999 })
            .collect()
    }

    #[test]
    fn extreme_positive_funding_is_bearish() {
        let history: Vec<f64> = (0..30).map(|i| 0.0001 + f64::from(i % 3) * 0.00001).collect();
        let score = compute(&with_inputs(SentimentInputs {
            funding_rate: Some(0.0008),
            funding_history: history,
            ..SentimentInputs::default()
        }))
        .unwrap();
        assert!(!score.degraded);
        assert!(score.diagnostics.contains_key("funding_zscore"));
        assert!(score.score < 10.0, "score {}", score.score);
    }

    #[test]
    fn funding_without_history_uses_basis_points() {
        let score = compute(&with_inputs(SentimentInputs {
            funding_rate: Some(-0.0003),
            ..SentimentInputs::default()
        }))
        .unwrap();
        assert!((score.diagnostics["funding_bps"] + 3.0).abs() < 1e-9);
        assert!(score.score > 80.0, "score {}", score.score);
    }

    #[test]
    fn crowded_longs_are_bearish() {
        let score = compute(&with_inputs(SentimentInputs {
            long_short_ratio: Some(3.0),
            ..SentimentInputs::default()
        }))
        .unwrap();
        assert!(score.score < 10.0, "score {}", score.score);

        let balanced = compute(&with_inputs(SentimentInputs {
            long_short_ratio: Some(1.0),
            ..SentimentInputs::default()
        }))
        .unwrap();
        assert!((balanced.score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_long_short_ratio_is_rejected() {
        let result = compute(&with_inputs(SentimentInputs {
            long_short_ratio: Some(0.0),
            ..SentimentInputs::default()
        }));
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn open_interest_building_into_a_rally_is_bullish() {
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now())
            .with_candles(Timeframe::M5, fixtures::candles(&fixtures::rising(60), |_| 100.0))
            .with_sentiment(SentimentInputs {
                open_interest: vec![100.0, 104.0, 110.0],
                ..SentimentInputs::default()
            });
        let score = compute(&snapshot).unwrap();
        assert!((score.diagnostics["open_interest_change"] - 10.0).abs() < 1e-9);
        assert!(score.score > 85.0, "score {}", score.score);
    }

    #[test]
    fn open_interest_without_price_falls_back_to_neutral_degraded() {
        let score = compute(&with_inputs(SentimentInputs {
            open_interest: vec![100.0, 110.0],
            ..SentimentInputs::default()
        }))
        .unwrap();
        assert!(score.degraded);
        assert!((score.score - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn price_proxy_stands_in_for_missing_inputs() {
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now())
            .with_candles(Timeframe::M5, fixtures::candles(&noisy_rise(60), |_| 100.0));
        let score = compute(&snapshot).unwrap();
        assert!(!score.degraded);
        assert!((score.diagnostics["price_proxy"] - 1.0).abs() < f64::EPSILON);
        assert!(score.score > 60.0, "score {}", score.score);
    }

    #[test]
    fn nothing_to_read_degrades() {
        let score = compute(&MarketSnapshot::new("BTCUSDT", Utc::now())).unwrap();
        assert!(score.degraded);
        assert!(score.degraded_reason.unwrap().contains("missing input"));
    }
}
