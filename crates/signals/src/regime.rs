//! Market regime detection and transform intensity.

use confluence_core::{stats, Candle, MarketSnapshot, ScoringConfig, Timeframe};
use serde::{Deserialize, Serialize};

use crate::ta;
use crate::transform::clamp_intensity;

/// Broad market condition on the primary timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    /// Not enough history to classify
    Unknown,
}

impl MarketRegime {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Ranging => "ranging",
            Self::Volatile => "volatile",
            Self::Unknown => "unknown",
        }
    }

    /// Base intensity before price-volume confirmation.
    #[must_use]
    pub fn base_intensity(&self) -> f64 {
        match self {
            Self::TrendingUp | Self::TrendingDown => 1.2,
            Self::Ranging => 0.9,
            Self::Volatile => 0.7,
            Self::Unknown => 1.0,
        }
    }
}

/// Per-snapshot context shared by every indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketContext {
    pub regime: MarketRegime,
    /// Timeframe the regime was read from
    pub timeframe: Option<Timeframe>,
    pub adx: Option<f64>,
    /// Latest ATR relative to its own average
    pub volatility_ratio: Option<f64>,
    /// Correlation of absolute price change with volume
    pub price_volume_correlation: Option<f64>,
    /// Multiplier applied to every transform, in [0.5, 1.5]
    pub intensity: f64,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            regime: MarketRegime::Unknown,
            timeframe: None,
            adx: None,
            volatility_ratio: None,
            price_volume_correlation: None,
            intensity: 1.0,
        }
    }
}

impl MarketContext {
    /// Reads regime and confirmation from the primary timeframe, falling back
    /// to the longest weighted series available.
    #[must_use]
    pub fn analyze(snapshot: &MarketSnapshot, config: &ScoringConfig) -> Self {
        let Some((timeframe, candles)) = select_series(snapshot, config) else {
            return Self::default();
        };
        let settings = &config.indicators;
        let regime_settings = &config.regime;

        let adx = ta::adx(candles, regime_settings.adx_period);
        let atr_series = ta::atr(candles, settings.atr_period);
        let volatility_ratio = ta::last(&atr_series).and_then(|latest| {
            let history: Vec<f64> = atr_series.iter().copied().filter(|v| v.is_finite()).collect();
            let mean = stats::mean(&history)?;
            (mean > 0.0).then(|| latest / mean)
        });

        let closes = ta::closes(candles);
        let trend_sign = match adx {
            Some(reading) if reading.plus_di != reading.minus_di => {
                (reading.plus_di - reading.minus_di).signum()
            }
            _ => {
                let mean = stats::mean(&closes).unwrap_or_default();
                closes.last().map_or(0.0, |c| (c - mean).signum())
            }
        };

        let regime = match (adx, volatility_ratio) {
            (_, Some(ratio)) if ratio >= regime_settings.volatility_ratio_high => {
                MarketRegime::Volatile
            }
            (Some(reading), _) if reading.adx >= regime_settings.adx_trend_threshold => {
                if trend_sign >= 0.0 {
                    MarketRegime::TrendingUp
                } else {
                    MarketRegime::TrendingDown
                }
            }
            (Some(_), _) => MarketRegime::Ranging,
            (None, _) => MarketRegime::Unknown,
        };

        let moves: Vec<f64> = ta::diff(&closes).iter().map(|d| d.abs()).collect();
        let volumes = ta::volumes(candles);
        let price_volume_correlation =
            stats::pearson(&moves, volumes.get(1..).unwrap_or_default());

        let confirmation = price_volume_correlation.map_or(1.0, |c| 1.0 + 0.25 * c);
        let intensity = clamp_intensity(regime.base_intensity() * confirmation);

        tracing::debug!(
            symbol = %snapshot.symbol,
            timeframe = %timeframe,
            regime = regime.as_str(),
            intensity,
            "Market context"
        );

        Self {
            regime,
            timeframe: Some(timeframe),
            adx: adx.map(|a| a.adx),
            volatility_ratio,
            price_volume_correlation,
            intensity,
        }
    }
}

fn select_series<'a>(
    snapshot: &'a MarketSnapshot,
    config: &ScoringConfig,
) -> Option<(Timeframe, &'a [Candle])> {
    let min = config.indicators.min_candles;
    let primary = config.indicators.primary_timeframe;
    if let Some(candles) = snapshot.candles(primary).filter(|c| c.len() >= min) {
        return Some((primary, candles));
    }
    snapshot
        .ohlcv
        .iter()
        .filter(|(_, series)| series.len() >= min)
        .max_by_key(|(_, series)| series.len())
        .map(|(tf, series)| (*tf, series.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ta::tests::candles_from_closes;
    use chrono::Utc;

    fn snapshot_with(closes: &[f64]) -> MarketSnapshot {
        MarketSnapshot::new("BTCUSDT", Utc::now())
            .with_candles(Timeframe::M5, candles_from_closes(closes))
    }

    #[test]
    fn steady_rise_is_trending_up() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.005_f64.powi(i)).collect();
        let ctx = MarketContext::analyze(&snapshot_with(&closes), &ScoringConfig::default());
        assert_eq!(ctx.regime, MarketRegime::TrendingUp);
        assert_eq!(ctx.timeframe, Some(Timeframe::M5));
    }

    #[test]
    fn steady_fall_is_trending_down() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 0.995_f64.powi(i)).collect();
        let ctx = MarketContext::analyze(&snapshot_with(&closes), &ScoringConfig::default());
        assert_eq!(ctx.regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn oscillation_is_ranging() {
        let closes: Vec<f64> = (0..80)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.5 })
            .collect();
        let ctx = MarketContext::analyze(&snapshot_with(&closes), &ScoringConfig::default());
        assert_eq!(ctx.regime, MarketRegime::Ranging);
        assert!(ctx.intensity < 1.0);
    }

    #[test]
    fn short_history_is_unknown_with_unit_intensity() {
        let ctx = MarketContext::analyze(&snapshot_with(&[100.0; 10]), &ScoringConfig::default());
        assert_eq!(ctx.regime, MarketRegime::Unknown);
        assert!((ctx.intensity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_series_without_minimum_is_unknown() {
        let mut config = ScoringConfig::default();
        config.indicators.min_candles = 0;
        let ctx = MarketContext::analyze(&snapshot_with(&[]), &config);
        assert_eq!(ctx.regime, MarketRegime::Unknown);
        assert_eq!(ctx.price_volume_correlation, None);
        assert!((ctx.intensity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn intensity_stays_in_bounds() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64).sin() * 5.0).collect();
        let ctx = MarketContext::analyze(&snapshot_with(&closes), &ScoringConfig::default());
        assert!((0.5..=1.5).contains(&ctx.intensity));
    }
}
