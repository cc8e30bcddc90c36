//! Small statistics helpers shared by indicators and the kill switch.

/// Arithmetic mean, `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1), `None` below two samples.
#[must_use]
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    Some(variance.sqrt())
}

/// Z-score of `current` against the history in `values`.
///
/// Returns `None` with fewer than two samples or zero dispersion.
#[must_use]
pub fn zscore(values: &[f64], current: f64) -> Option<f64> {
    let m = mean(values)?;
    let sd = std_dev(values)?;
    if sd > f64::EPSILON {
        Some((current - m) / sd)
    } else {
        None
    }
}

/// Fraction of `values` less than or equal to `current`.
#[must_use]
pub fn percentile_rank(values: &[f64], current: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let count_below = values.iter().filter(|&&v| v <= current).count();
    Some(count_below as f64 / values.len() as f64)
}

/// Value at quantile `q` in `[0, 1]` using linear interpolation.
#[must_use]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !q.is_finite() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Pearson correlation of two equally long series.
///
/// `None` when lengths differ, fewer than three points, or either side is flat.
#[must_use]
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 3 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    let denom = (vx * vy).sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Wilson score confidence interval for a proportion.
///
/// ```text
/// CI = (p + z^2/(2n) +/- z * sqrt(p(1-p)/n + z^2/(4n^2))) / (1 + z^2/n)
/// ```
///
/// Returns `(0.0, 0.0)` for zero trials.
#[must_use]
pub fn wilson_ci(wins: usize, n: usize, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }

    let n_f = n as f64;
    let p = wins as f64 / n_f;
    let z_sq = z * z;

    let denominator = 1.0 + z_sq / n_f;
    let center = p + z_sq / (2.0 * n_f);
    let spread = z * (p * (1.0 - p) / n_f + z_sq / (4.0 * n_f * n_f)).sqrt();

    let lower = (center - spread) / denominator;
    let upper = (center + spread) / denominator;

    (lower.max(0.0), upper.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_of_mean_is_zero() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(zscore(&values, 3.0).unwrap().abs() < 1e-12);
    }

    #[test]
    fn zscore_of_flat_series_is_none() {
        assert!(zscore(&[2.0, 2.0, 2.0], 5.0).is_none());
        assert!(zscore(&[2.0], 5.0).is_none());
    }

    #[test]
    fn percentile_counts_inclusive() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile_rank(&values, 2.0).unwrap() - 0.5).abs() < 1e-12);
        assert!(percentile_rank(&[], 1.0).is_none());
    }

    #[test]
    fn quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert!((quantile(&values, 0.5).unwrap() - 3.0).abs() < 1e-12);
        assert!((quantile(&values, 0.9).unwrap() - 4.6).abs() < 1e-12);
        assert!((quantile(&values, 1.0).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_detects_perfect_relationships() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let up = [2.0, 4.0, 6.0, 8.0];
        let down = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &up).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&xs, &down).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_rejects_flat_or_mismatched() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn wilson_ci_50_percent_approximately_40_60() {
        let (lower, upper) = wilson_ci(50, 100, 1.96);
        assert!(lower > 0.39 && lower < 0.41);
        assert!(upper > 0.59 && upper < 0.61);
    }

    #[test]
    fn wilson_ci_zero_samples() {
        assert_eq!(wilson_ci(0, 0, 1.96), (0.0, 0.0));
    }

    #[test]
    fn wilson_ci_bounds_stay_in_unit_interval() {
        let (lower, upper) = wilson_ci(0, 10, 1.96);
        assert!(lower.abs() < f64::EPSILON);
        assert!(upper > 0.0 && upper <= 1.0);
        let (lower, upper) = wilson_ci(10, 10, 1.96);
        assert!(lower < 1.0);
        assert!((upper - 1.0).abs() < f64::EPSILON);
    }
}
