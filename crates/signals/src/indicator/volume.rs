//! Volume participation and money flow, scored per timeframe.
//!
//! Relative volume compares the latest bar against an exponential baseline of
//! the bars before it and takes the sign of the candle body. Divergence
//! compares price change with accumulation/distribution flow on the context
//! timeframe.

use confluence_core::{
    stats, Candle, Category, ComponentScore, IndicatorSettings, MarketSnapshot, ScoringConfig,
    ValidationError,
};

use super::{context_series, score_timeframes, Indicator, SubScores};
use crate::divergence::detect_divergence;
use crate::regime::MarketContext;
use crate::ta;
use crate::transform::TransformParams;

/// Relative volume minus one, signed by the candle body
const RELATIVE_VOLUME: TransformParams = TransformParams::symmetric(0.5, 1.5, 3.0);
/// Flow slope per bar in units of average volume
const FLOW_SLOPE: TransformParams = TransformParams::symmetric(0.3, 0.8, 1.5);
const CMF: TransformParams = TransformParams::symmetric(0.1, 0.25, 0.5);
const MFI: TransformParams = TransformParams::centered(50.0, 15.0, 30.0, 40.0);
/// Close distance from VWAP in percent
const VWAP_DEVIATION: TransformParams = TransformParams::symmetric(0.3, 1.0, 2.5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VolumeIndicator;

impl Indicator for VolumeIndicator {
    fn category(&self) -> Category {
        Category::Volume
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        let component = score_timeframes(snapshot, config, Category::Volume, |candles| {
            score_candles(candles, &config.indicators, ctx.intensity)
        })?;
        if component.degraded {
            return Ok(component);
        }

        let bonus = context_series(snapshot, config, ctx).and_then(|candles| {
            let price_changes = ta::diff(&ta::closes(candles));
            let flow_changes = ta::diff(&ta::accumulation_distribution(candles));
            let recent = flow_changes.len().saturating_sub(config.divergence.window);
            let flow_trend: f64 = flow_changes[recent..].iter().sum();
            detect_divergence(&price_changes, &flow_changes, flow_trend, &config.divergence)
        });
        Ok(component.with_divergence(bonus))
    }
}

fn score_candles(
    candles: &[Candle],
    settings: &IndicatorSettings,
    intensity: f64,
) -> Result<SubScores, ValidationError> {
    let mut subs = SubScores::new(intensity);
    let Some(last) = candles.last() else {
        return Ok(subs);
    };
    let volumes = ta::volumes(candles);
    let baseline_period = settings.volume_baseline_period;

    let baseline = ta::last(&ta::ema(&volumes[..volumes.len() - 1], baseline_period));
    if let Some(baseline) = baseline.filter(|b| *b > 0.0) {
        let relative = last.volume / baseline;
        subs.push(
            "relative_volume",
            (relative - 1.0) * last.body_sign(),
            &RELATIVE_VOLUME,
            0.20,
        )?;
    }

    let window = baseline_period.min(candles.len());
    let mean_volume = stats::mean(&volumes[volumes.len() - window..]).unwrap_or_default();
    if mean_volume > 0.0 {
        if let Some(slope) = ta::slope(&ta::obv(candles), window) {
            subs.push("obv_slope", slope / mean_volume, &FLOW_SLOPE, 0.20)?;
        }
        if let Some(slope) = ta::slope(&ta::accumulation_distribution(candles), window) {
            subs.push("ad_slope", slope / mean_volume, &FLOW_SLOPE, 0.15)?;
        }
    }

    if let Some(cmf) = ta::chaikin_money_flow(candles, settings.money_flow_period) {
        subs.push("chaikin_money_flow", cmf, &CMF, 0.15)?;
    }
    if let Some(mfi) = ta::money_flow_index(candles, settings.money_flow_period) {
        subs.push("money_flow_index", mfi, &MFI, 0.15)?;
    }
    if let Some(vwap) = ta::vwap(candles, baseline_period).filter(|v| *v > 0.0) {
        subs.push(
            "vwap_deviation",
            (last.close - vwap) / vwap * 100.0,
            &VWAP_DEVIATION,
            0.15,
        )?;
    }

    Ok(subs)
}
