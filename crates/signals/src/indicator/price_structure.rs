//! Where price sits in its recent structure, scored per timeframe.

use confluence_core::{
    Candle, Category, ComponentScore, IndicatorSettings, MarketSnapshot, ScoringConfig,
    ValidationError,
};

use super::{score_timeframes, Indicator, SubScores};
use crate::regime::MarketContext;
use crate::ta;
use crate::transform::TransformParams;

/// Close within the lookback high/low range, 0 at the low and 1 at the high
const RANGE_POSITION: TransformParams = TransformParams::centered(0.5, 0.15, 0.35, 0.5);
/// Mean of the higher-high and higher-low signs, in [-1, 1]
const SWING: TransformParams = TransformParams::symmetric(0.5, 1.0, 1.5);
/// Close distance from the lookback SMA in ATR units
const TREND_DISTANCE: TransformParams = TransformParams::symmetric(0.5, 1.5, 3.0);
/// Close beyond the prior range in ATR units
const BREAKOUT: TransformParams = TransformParams::symmetric(0.25, 1.0, 2.0);

/// Breakouts on below-average volume count half.
const UNCONFIRMED_BREAKOUT_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PriceStructureIndicator;

impl Indicator for PriceStructureIndicator {
    fn category(&self) -> Category {
        Category::PriceStructure
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        score_timeframes(snapshot, config, Category::PriceStructure, |candles| {
            score_candles(candles, &config.indicators, ctx.intensity)
        })
    }
}

fn score_candles(
    candles: &[Candle],
    settings: &IndicatorSettings,
    intensity: f64,
) -> Result<SubScores, ValidationError> {
    let mut subs = SubScores::new(intensity);
    let lookback = settings.structure_lookback;
    if lookback < 4 || candles.len() <= lookback {
        return Ok(subs);
    }
    let Some(last) = candles.last() else {
        return Ok(subs);
    };
    let window = &candles[candles.len() - lookback..];

    let (low, high) = range(window);
    if high - low > f64::EPSILON {
        let position = (last.close - low) / (high - low);
        subs.push("range_position", position, &RANGE_POSITION, 0.25)?;
    }

    let (older, newer) = window.split_at(lookback / 2);
    let (older_low, older_high) = range(older);
    let (newer_low, newer_high) = range(newer);
    let swing = (sign(newer_high - older_high, older_high)
        + sign(newer_low - older_low, older_low))
        / 2.0;
    subs.push("swing_structure", swing, &SWING, 0.25)?;

    let Some(atr) = ta::last(&ta::atr(candles, settings.atr_period)).filter(|a| *a > 0.0) else {
        return Ok(subs);
    };

    if let Some(sma) = ta::last(&ta::sma(&ta::closes(candles), lookback)) {
        subs.push("trend_distance", (last.close - sma) / atr, &TREND_DISTANCE, 0.25)?;
    }

    let prior = &candles[candles.len() - lookback - 1..candles.len() - 1];
    let (prior_low, prior_high) = range(prior);
    let beyond = if last.close > prior_high {
        last.close - prior_high
    } else if last.close < prior_low {
        last.close - prior_low
    } else {
        0.0
    };
    let average_volume = prior.iter().map(|c| c.volume).sum::<f64>() / prior.len() as f64;
    let confirmation = if last.volume >= average_volume {
        1.0
    } else {
        UNCONFIRMED_BREAKOUT_FACTOR
    };
    subs.push("breakout", beyond / atr * confirmation, &BREAKOUT, 0.25)?;

    Ok(subs)
}

/// Lowest low and highest high.
fn range(candles: &[Candle]) -> (f64, f64) {
    candles.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
        (lo.min(c.low), hi.max(c.high))
    })
}

/// Sign of a change, zero when it is negligible relative to `reference`.
fn sign(change: f64, reference: f64) -> f64 {
    if change.abs() <= reference.abs() * 1e-9 {
        0.0
    } else {
        change.signum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::fixtures;
    use confluence_core::Timeframe;

    fn compute(snapshot: &MarketSnapshot) -> ComponentScore {
        PriceStructureIndicator
            .compute(snapshot, &ScoringConfig::default())
            .unwrap()
    }

    #[test]
    fn higher_highs_and_lows_score_bullish() {
        let score = compute(&fixtures::all_timeframes(&fixtures::rising(80)));
        assert!(!score.degraded);
        assert!((score.diagnostics["5m.swing_structure"] - 1.0).abs() < f64::EPSILON);
        assert!(score.score > 65.0, "score {}", score.score);
    }

    #[test]
    fn lower_highs_and_lows_score_bearish() {
        let score = compute(&fixtures::all_timeframes(&fixtures::falling(80)));
        assert!((score.diagnostics["5m.swing_structure"] + 1.0).abs() < f64::EPSILON);
        assert!(score.score < 35.0, "score {}", score.score);
    }

    #[test]
    fn flat_range_is_neutral() {
        let score = compute(&fixtures::all_timeframes(&[100.0; 60]));
        assert!(score.diagnostics["5m.swing_structure"].abs() < f64::EPSILON);
        assert!(score.diagnostics["5m.breakout"].abs() < f64::EPSILON);
        assert!((score.score - 50.0).abs() < 1e-6, "score {}", score.score);
    }

    #[test]
    fn volume_confirmed_breakout_beats_unconfirmed() {
        let mut closes = vec![100.0; 59];
        closes.push(101.5);
        let confirmed = fixtures::candles(&closes, |i| if i == 59 { 400.0 } else { 100.0 });
        let unconfirmed = fixtures::candles(&closes, |i| if i == 59 { 50.0 } else { 100.0 });

        let snapshot = |candles: Vec<Candle>| {
            MarketSnapshot::new("BTCUSDT", chrono::Utc::now()).with_candles(Timeframe::M5, candles)
        };
        let strong = compute(&snapshot(confirmed));
        let weak = compute(&snapshot(unconfirmed));

        let strong_breakout = strong.diagnostics["5m.breakout"];
        assert!(strong_breakout > 0.0);
        assert!((weak.diagnostics["5m.breakout"] - strong_breakout * 0.5).abs() < 1e-9);
        assert!(strong.score > weak.score);
    }

    #[test]
    fn lookback_not_covered_degrades() {
        let snapshot = MarketSnapshot::new("BTCUSDT", chrono::Utc::now())
            .with_candles(Timeframe::M5, fixtures::candles(&fixtures::rising(20), |_| 10.0));
        assert!(compute(&snapshot).degraded);
    }
}
