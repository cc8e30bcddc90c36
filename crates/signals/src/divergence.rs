//! Price/flow divergence detection.
//!
//! Price change and flow change normally move together. When their rolling
//! correlation falls well below its own historical mean, flow is telling a
//! different story than price, and the component carries a bounded bonus in
//! the direction of the flow.

use confluence_core::{stats, DivergenceBonus, DivergenceConfig, DivergenceKind};

/// Rolling Pearson correlation. Entry `i` covers `xs[i..i + window]`;
/// windows with a flat side are skipped.
#[must_use]
pub fn rolling_correlation(xs: &[f64], ys: &[f64], window: usize) -> Vec<f64> {
    let n = xs.len().min(ys.len());
    if window < 3 || n < window {
        return Vec::new();
    }
    (0..=n - window)
        .filter_map(|i| stats::pearson(&xs[i..i + window], &ys[i..i + window]))
        .collect()
}

/// Compares the latest rolling correlation with the mean of earlier windows.
///
/// `flow_trend` is the sign of the recent flow (positive: buying). Returns
/// `None` without enough windows, without a drop beyond the threshold, or
/// with a flat flow trend.
#[must_use]
pub fn detect_divergence(
    price_changes: &[f64],
    flow_changes: &[f64],
    flow_trend: f64,
    config: &DivergenceConfig,
) -> Option<DivergenceBonus> {
    let correlations = rolling_correlation(price_changes, flow_changes, config.window);
    let (latest, history) = correlations.split_last()?;
    if history.len() < 2 {
        return None;
    }
    let historical_mean = stats::mean(history)?;
    let drop = historical_mean - latest;
    if drop <= config.drop_threshold || !flow_trend.is_finite() || flow_trend == 0.0 {
        return None;
    }

    let kind = if flow_trend > 0.0 {
        DivergenceKind::Bullish
    } else {
        DivergenceKind::Bearish
    };
    let magnitude = (config.max_bonus * drop.min(1.0)).clamp(0.0, config.max_bonus);
    tracing::debug!(
        kind = ?kind,
        correlation = latest,
        historical_mean,
        magnitude,
        "Divergence detected"
    );
    Some(DivergenceBonus {
        kind,
        magnitude,
        correlation: *latest,
        historical_mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DivergenceConfig {
        DivergenceConfig {
            window: 5,
            drop_threshold: 0.4,
            max_bonus: 5.0,
            max_total_bonus: 10.0,
        }
    }

    fn wiggle(i: usize) -> f64 {
        [1.0, -0.5, 2.0, -1.5, 0.7, -0.2, 1.3][i % 7]
    }

    #[test]
    fn rolling_window_count() {
        let xs: Vec<f64> = (0..10).map(wiggle).collect();
        assert_eq!(rolling_correlation(&xs, &xs, 5).len(), 6);
        assert!(rolling_correlation(&xs, &xs, 2).is_empty());
    }

    #[test]
    fn aligned_series_have_no_divergence() {
        let xs: Vec<f64> = (0..30).map(wiggle).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x * 2.0).collect();
        assert!(detect_divergence(&xs, &ys, 1.0, &config()).is_none());
    }

    #[test]
    fn decoupled_tail_yields_bonus_in_flow_direction() {
        let mut xs: Vec<f64> = (0..30).map(wiggle).collect();
        let ys: Vec<f64> = xs.clone();
        for x in xs.iter_mut().skip(25) {
            *x = -*x;
        }

        let bullish = detect_divergence(&xs, &ys, 1.0, &config()).unwrap();
        assert_eq!(bullish.kind, DivergenceKind::Bullish);
        assert!(bullish.magnitude > 0.0 && bullish.magnitude <= 5.0);
        assert!(bullish.correlation < bullish.historical_mean);

        let bearish = detect_divergence(&xs, &ys, -3.0, &config()).unwrap();
        assert_eq!(bearish.kind, DivergenceKind::Bearish);
        assert!(bearish.signed() < 0.0);
    }

    #[test]
    fn flat_flow_trend_yields_nothing() {
        let mut xs: Vec<f64> = (0..30).map(wiggle).collect();
        let ys = xs.clone();
        for x in xs.iter_mut().skip(25) {
            *x = -*x;
        }
        assert!(detect_divergence(&xs, &ys, 0.0, &config()).is_none());
    }
}
