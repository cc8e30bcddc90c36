//! Momentum and trend oscillators, scored per timeframe.

use confluence_core::{
    Candle, Category, ComponentScore, IndicatorSettings, MarketSnapshot, ScoringConfig,
    ValidationError,
};

use super::{score_timeframes, Indicator, SubScores};
use crate::regime::MarketContext;
use crate::ta;
use crate::transform::TransformParams;

const RSI: TransformParams = TransformParams::centered(50.0, 10.0, 20.0, 30.0);
/// MACD histogram in ATR units
const MACD: TransformParams = TransformParams::symmetric(0.1, 0.3, 0.6);
/// EMA fast/slow spread in ATR units
const EMA_SPREAD: TransformParams = TransformParams::symmetric(0.5, 1.5, 3.0);
const STOCHASTIC: TransformParams = TransformParams::centered(50.0, 20.0, 35.0, 45.0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TechnicalIndicator;

impl Indicator for TechnicalIndicator {
    fn category(&self) -> Category {
        Category::Technical
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        score_timeframes(snapshot, config, Category::Technical, |candles| {
            score_candles(candles, &config.indicators, ctx.intensity)
        })
    }
}

fn score_candles(
    candles: &[Candle],
    settings: &IndicatorSettings,
    intensity: f64,
) -> Result<SubScores, ValidationError> {
    let closes = ta::closes(candles);
    let mut subs = SubScores::new(intensity);

    if let Some(rsi) = ta::last(&ta::rsi(&closes, settings.rsi_period)) {
        subs.push("rsi", rsi, &RSI, 0.30)?;
    }

    if let Some(atr) = ta::last(&ta::atr(candles, settings.atr_period)).filter(|a| *a > 0.0) {
        let hist = ta::macd_histogram(
            &closes,
            settings.macd_fast,
            settings.macd_slow,
            settings.macd_signal,
        );
        if let Some(hist) = ta::last(&hist) {
            subs.push("macd_histogram", hist / atr, &MACD, 0.25)?;
        }

        let fast = ta::last(&ta::ema(&closes, settings.ema_fast));
        let slow = ta::last(&ta::ema(&closes, settings.ema_slow));
        if let (Some(fast), Some(slow)) = (fast, slow) {
            subs.push("ema_spread", (fast - slow) / atr, &EMA_SPREAD, 0.25)?;
        }
    }

    if let Some(k) = ta::stochastic_k(candles, settings.rsi_period) {
        subs.push("stochastic_k", k, &STOCHASTIC, 0.20)?;
    }

    Ok(subs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::fixtures;
    use confluence_core::Timeframe;

    fn compute(closes: &[f64]) -> ComponentScore {
        TechnicalIndicator
            .compute(&fixtures::all_timeframes(closes), &ScoringConfig::default())
            .unwrap()
    }

    #[test]
    fn uptrend_scores_bullish() {
        let score = compute(&fixtures::rising(80));
        assert!(!score.degraded);
        assert!(score.score > 60.0, "score {}", score.score);
    }

    #[test]
    fn downtrend_scores_bearish() {
        let score = compute(&fixtures::falling(80));
        assert!(score.score < 40.0, "score {}", score.score);
    }

    #[test]
    fn every_weighted_timeframe_is_scored() {
        let score = compute(&fixtures::rising(80));
        assert_eq!(score.timeframe_scores.len(), 4);
        assert!(score.sub_scores.contains_key("5m.rsi"));
        assert!(score.diagnostics.contains_key("1m.macd_histogram"));
    }

    #[test]
    fn timeframes_without_history_are_skipped() {
        let snapshot = MarketSnapshot::new("ETHUSDT", chrono::Utc::now())
            .with_candles(Timeframe::M5, fixtures::candles(&fixtures::rising(80), |_| 10.0))
            .with_candles(Timeframe::M1, fixtures::candles(&fixtures::rising(5), |_| 10.0));
        let score = TechnicalIndicator
            .compute(&snapshot, &ScoringConfig::default())
            .unwrap();
        assert!(!score.degraded);
        assert_eq!(score.timeframe_scores.len(), 1);
        assert!(score.timeframe_scores.contains_key(&Timeframe::M5));
    }

    #[test]
    fn no_history_degrades() {
        let snapshot = MarketSnapshot::new("ETHUSDT", chrono::Utc::now());
        let score = TechnicalIndicator
            .compute(&snapshot, &ScoringConfig::default())
            .unwrap();
        assert!(score.degraded);
        assert!(score.degraded_reason.unwrap().contains("insufficient history"));
    }
}
