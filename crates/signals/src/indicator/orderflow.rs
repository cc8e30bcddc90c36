//! Trade-tape order flow: who is crossing the spread, and how hard.

use confluence_core::{
    stats, Category, ComponentScore, DegradedComputation, MarketSnapshot, ScoringConfig,
    TradePrint, TradeSide, ValidationError,
};

use super::{finish, Indicator, SubScores};
use crate::divergence::detect_divergence;
use crate::regime::MarketContext;
use crate::ta;
use crate::transform::TransformParams;

const CVD_RATIO: TransformParams = TransformParams::symmetric(0.15, 0.35, 0.6);
const RECENT_IMBALANCE: TransformParams = TransformParams::symmetric(0.2, 0.45, 0.7);
const LARGE_TRADE_BIAS: TransformParams = TransformParams::symmetric(0.2, 0.5, 0.8);
const AGGRESSOR_RATIO: TransformParams = TransformParams::symmetric(0.1, 0.3, 0.6);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OrderflowIndicator;

impl Indicator for OrderflowIndicator {
    fn category(&self) -> Category {
        Category::Orderflow
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        let settings = &config.indicators;
        let trades = &snapshot.trades;
        if trades.len() < settings.min_trades {
            let reason = DegradedComputation::InsufficientHistory {
                required: settings.min_trades,
                available: trades.len(),
            };
            return Ok(finish(snapshot, Category::Orderflow, &SubScores::new(1.0), || reason));
        }

        let Some(cvd_ratio) = flow_ratio(trades) else {
            let reason = DegradedComputation::Numeric("trade tape carries no volume".to_string());
            return Ok(finish(snapshot, Category::Orderflow, &SubScores::new(1.0), || reason));
        };
        let cvd: f64 = trades.iter().map(TradePrint::signed_size).sum();
        let mut subs = SubScores::new(ctx.intensity);
        subs.push("cvd_ratio", cvd_ratio, &CVD_RATIO, 0.35)?;

        let recent_len = (trades.len() / 4).max(settings.min_trades / 2).max(1);
        if let Some(ratio) = flow_ratio(&trades[trades.len() - recent_len..]) {
            subs.push("recent_imbalance", ratio, &RECENT_IMBALANCE, 0.25)?;
        }

        if let Some(bias) = large_trade_bias(trades, settings.large_trade_quantile) {
            subs.push("large_trade_bias", bias, &LARGE_TRADE_BIAS, 0.20)?;
        }

        let buys = trades.iter().filter(|t| t.side == TradeSide::Buy).count() as f64;
        let aggressor = (2.0 * buys - trades.len() as f64) / trades.len() as f64;
        subs.push("aggressor_ratio", aggressor, &AGGRESSOR_RATIO, 0.20)?;

        let component = finish(snapshot, Category::Orderflow, &subs, || {
            DegradedComputation::Numeric("order flow produced no sub-scores".to_string())
        });

        let bonus = bucket_flows(trades, settings.flow_buckets).and_then(|(prices, deltas)| {
            let price_changes = ta::diff(&prices);
            let flow_changes = &deltas[1..];
            let recent = flow_changes.len().saturating_sub(config.divergence.window);
            let flow_trend: f64 = flow_changes[recent..].iter().sum();
            detect_divergence(&price_changes, flow_changes, flow_trend, &config.divergence)
        });

        Ok(component
            .with_diagnostic("cvd", cvd)
            .with_diagnostic("trade_count", trades.len() as f64)
            .with_divergence(bonus))
    }
}

/// Net signed size over total size, in [-1, 1].
fn flow_ratio(trades: &[TradePrint]) -> Option<f64> {
    let total: f64 = trades.iter().map(|t| t.size).sum();
    if total <= f64::EPSILON {
        return None;
    }
    Some(trades.iter().map(TradePrint::signed_size).sum::<f64>() / total)
}

/// Flow ratio among prints at or above the size quantile.
fn large_trade_bias(trades: &[TradePrint], quantile: f64) -> Option<f64> {
    let sizes: Vec<f64> = trades.iter().map(|t| t.size).collect();
    let threshold = stats::quantile(&sizes, quantile)?;
    let large: Vec<TradePrint> = trades
        .iter()
        .filter(|t| t.size >= threshold && t.size > 0.0)
        .copied()
        .collect();
    flow_ratio(&large)
}

/// Splits the tape into equal-count buckets: closing price and net delta of each.
fn bucket_flows(trades: &[TradePrint], buckets: usize) -> Option<(Vec<f64>, Vec<f64>)> {
    let per_bucket = trades.len() / buckets;
    if per_bucket < 2 {
        return None;
    }
    let start = trades.len() - per_bucket * buckets;
    let (prices, deltas) = trades[start..]
        .chunks(per_bucket)
        .filter_map(|chunk| {
            let last = chunk.last()?;
            Some((last.price, chunk.iter().map(TradePrint::signed_size).sum::<f64>()))
        })
        .unzip();
    Some((prices, deltas))
}
