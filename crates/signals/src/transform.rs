//! Unified non-linear scoring transform.
//!
//! Every indicator sub-metric is mapped onto 0-100 through [`score_deviation`].
//! With `x = value - center` (negated for [`Polarity::Inverse`]):
//!
//! ```text
//! |x| <= spike             A * tanh(|x| / normal)               sigmoid-shaped
//! spike < |x| <= extreme   exponential growth up to M_e         outliers amplified
//! |x| > extreme            exponential decay towards 50         compressed, never clipped
//! score = 50 + sign(x) * magnitude * intensity
//! ```
//!
//! The pieces meet at `spike` and `extreme`, so the curve is continuous and
//! strictly monotonic in `x`.

use confluence_core::{ValidationError, NEUTRAL_SCORE};
use serde::{Deserialize, Serialize};

/// Magnitude reached by the sigmoid piece as `|x|` grows without bound.
pub const SIGMOID_AMPLITUDE: f64 = 40.0;
/// Magnitude at the extreme threshold.
pub const EXTREME_MAGNITUDE: f64 = 47.0;
/// Lower bound applied to intensity.
pub const MIN_INTENSITY: f64 = 0.5;
/// Upper bound applied to intensity.
pub const MAX_INTENSITY: f64 = 1.5;

const MAX_MAGNITUDE: f64 = 50.0;
const GROWTH_RATE: f64 = 2.0;

/// Whether a positive deviation is bullish or bearish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Above centre is bullish
    Direct,
    /// Above centre is bearish (contrarian readings)
    Inverse,
}

impl Polarity {
    #[must_use]
    pub fn sign(&self) -> f64 {
        match self {
            Self::Direct => 1.0,
            Self::Inverse => -1.0,
        }
    }
}

/// Shape of the transform for one sub-metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Value that maps to 50
    pub center: f64,
    /// Deviation considered ordinary
    pub normal: f64,
    /// Deviation where the curve switches to exponential growth
    pub spike: f64,
    /// Deviation where the curve switches to exponential decay
    pub extreme: f64,
    pub polarity: Polarity,
}

impl TransformParams {
    /// Direct polarity around zero.
    #[must_use]
    pub const fn symmetric(normal: f64, spike: f64, extreme: f64) -> Self {
        Self::centered(0.0, normal, spike, extreme)
    }

    /// Direct polarity around `center`.
    #[must_use]
    pub const fn centered(center: f64, normal: f64, spike: f64, extreme: f64) -> Self {
        Self {
            center,
            normal,
            spike,
            extreme,
            polarity: Polarity::Direct,
        }
    }

    #[must_use]
    pub const fn inverse(mut self) -> Self {
        self.polarity = Polarity::Inverse;
        self
    }

    /// # Errors
    /// Returns an error unless every field is finite and `0 < normal <= spike < extreme`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let finite = [self.center, self.normal, self.spike, self.extreme]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.normal <= 0.0 || self.normal > self.spike || self.spike >= self.extreme
        {
            return Err(ValidationError::invalid_config(format!(
                "transform requires 0 < normal <= spike < extreme, got normal={} spike={} extreme={}",
                self.normal, self.spike, self.extreme
            )));
        }
        Ok(())
    }

    fn magnitude(&self, deviation: f64) -> f64 {
        let at_spike = SIGMOID_AMPLITUDE * (self.spike / self.normal).tanh();
        if deviation <= self.spike {
            SIGMOID_AMPLITUDE * (deviation / self.normal).tanh()
        } else if deviation <= self.extreme {
            let t = (deviation - self.spike) / (self.extreme - self.spike);
            let growth = ((GROWTH_RATE * t).exp() - 1.0) / (GROWTH_RATE.exp() - 1.0);
            at_spike + (EXTREME_MAGNITUDE - at_spike) * growth
        } else {
            let over = (deviation - self.extreme) / (self.extreme - self.spike);
            EXTREME_MAGNITUDE + (MAX_MAGNITUDE - EXTREME_MAGNITUDE) * (1.0 - (-over).exp())
        }
    }
}

/// Clamps an intensity into `[MIN_INTENSITY, MAX_INTENSITY]`; non-finite means 1.0.
#[must_use]
pub fn clamp_intensity(intensity: f64) -> f64 {
    if intensity.is_finite() {
        intensity.clamp(MIN_INTENSITY, MAX_INTENSITY)
    } else {
        1.0
    }
}

/// Maps a raw sub-metric onto 0-100.
///
/// Non-finite values score 50. The result is always within `[0, 100]`.
///
/// # Errors
/// Returns [`ValidationError::InvalidConfig`] if `params` are invalid.
pub fn score_deviation(
    value: f64,
    params: &TransformParams,
    intensity: f64,
) -> Result<f64, ValidationError> {
    params.validate()?;
    if !value.is_finite() {
        return Ok(NEUTRAL_SCORE);
    }
    let deviation = (value - params.center) * params.polarity.sign();
    if deviation == 0.0 {
        return Ok(NEUTRAL_SCORE);
    }
    let magnitude = (params.magnitude(deviation.abs()) * clamp_intensity(intensity)).min(MAX_MAGNITUDE);
    Ok((NEUTRAL_SCORE + deviation.signum() * magnitude).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PARAMS: TransformParams = TransformParams::symmetric(1.0, 2.0, 4.0);

    fn score(value: f64) -> f64 {
        score_deviation(value, &PARAMS, 1.0).unwrap()
    }

    #[test]
    fn center_maps_to_fifty() {
        assert!((score(0.0) - 50.0).abs() < f64::EPSILON);
        let rsi = TransformParams::centered(50.0, 10.0, 20.0, 30.0);
        assert!((score_deviation(50.0, &rsi, 1.0).unwrap() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn curve_is_odd_around_center() {
        for x in [0.3, 1.0, 2.5, 5.0, 50.0] {
            assert!((score(x) + score(-x) - 100.0).abs() < 1e-9, "x={x}");
        }
    }

    #[test]
    fn normal_deviation_uses_sigmoid() {
        let expected = 50.0 + SIGMOID_AMPLITUDE * 1.0_f64.tanh();
        assert!((score(1.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn pieces_meet_at_thresholds() {
        let eps = 1e-7;
        assert!((score(2.0 - eps) - score(2.0 + eps)).abs() < 1e-4);
        assert!((score(4.0 - eps) - score(4.0 + eps)).abs() < 1e-4);
        assert!((score(4.0) - (50.0 + EXTREME_MAGNITUDE)).abs() < 1e-9);
    }

    #[test]
    fn spike_region_grows_faster_than_linear_interpolation() {
        let at_spike = score(2.0);
        let at_extreme = score(4.0);
        let midpoint = score(3.0);
        assert!(midpoint < (at_spike + at_extreme) / 2.0);
        assert!(midpoint > at_spike);
    }

    #[test]
    fn beyond_extreme_is_compressed_below_bound() {
        assert!(score(10.0) < 100.0);
        assert!(score(1e6) <= 100.0);
        assert!(score(10.0) > score(5.0));
    }

    #[test]
    fn non_finite_values_are_neutral() {
        assert!((score(f64::NAN) - 50.0).abs() < f64::EPSILON);
        assert!((score(f64::INFINITY) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inverse_polarity_mirrors() {
        let inverse = PARAMS.inverse();
        let direct = score(1.5);
        let mirrored = score_deviation(1.5, &inverse, 1.0).unwrap();
        assert!((direct + mirrored - 100.0).abs() < 1e-9);
    }

    #[test]
    fn intensity_scales_and_is_clamped() {
        let low = score_deviation(1.0, &PARAMS, 0.5).unwrap();
        let high = score_deviation(1.0, &PARAMS, 1.5).unwrap();
        let clamped = score_deviation(1.0, &PARAMS, 10.0).unwrap();
        assert!(low < score(1.0) && score(1.0) < high);
        assert!((clamped - high).abs() < 1e-9);
        assert!((score_deviation(1.0, &PARAMS, f64::NAN).unwrap() - score(1.0)).abs() < 1e-9);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let cases = [
            TransformParams::symmetric(0.0, 1.0, 2.0),
            TransformParams::symmetric(2.0, 1.0, 3.0),
            TransformParams::symmetric(1.0, 2.0, 2.0),
            TransformParams::symmetric(f64::NAN, 2.0, 3.0),
        ];
        for params in cases {
            assert!(score_deviation(1.0, &params, 1.0).is_err());
        }
    }

    proptest! {
        #[test]
        fn scores_stay_in_bounds(value in -1e9f64..1e9, intensity in 0.0f64..3.0) {
            let s = score_deviation(value, &PARAMS, intensity).unwrap();
            prop_assert!((0.0..=100.0).contains(&s));
        }

        #[test]
        fn scores_are_monotonic(a in -20.0f64..20.0, b in -20.0f64..20.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(score(lo) <= score(hi) + 1e-12);
        }
    }
}
