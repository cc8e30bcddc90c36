//! Confidence-based stop-loss sizing.
//!
//! Each direction has a base stop, a decision threshold, and min/max
//! multipliers. A score that has not crossed the threshold gets the widest
//! stop (`base * max`). Past the threshold, confidence is the score's position
//! between the threshold and the extreme end (100 for BUY, 0 for SELL), and
//! the stop tightens linearly towards `base * min`:
//!
//! ```text
//! pct = max_stop - confidence * (max_stop - min_stop)
//! ```
//!
//! Higher confidence means a tighter stop. The result is then checked against
//! an absolute sanity range; a result outside it is clamped and flagged.

use confluence_core::{
    CompositeSignal, ConfigVersion, Direction, DirectionalStop, StopLossConfig, TargetPrice,
    TradeParameters, ValidationError,
};
use serde::{Deserialize, Serialize};

/// Stop distance for one direction and score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopDecision {
    /// Stop distance in percent, after the sanity bound
    pub pct: f64,
    /// Stop distance before the sanity bound
    pub unbounded_pct: f64,
    /// Normalized confidence in [0, 1]
    pub confidence: f64,
    /// True if the sanity bound changed the stop
    pub out_of_range: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopLossCalculator {
    config: StopLossConfig,
}

impl StopLossCalculator {
    #[must_use]
    pub fn new(config: StopLossConfig) -> Self {
        Self { config }
    }

    /// Calculator bound to a published configuration version.
    #[must_use]
    pub fn from_version(version: &ConfigVersion) -> Self {
        Self::new(version.scoring.stop_loss.clone())
    }

    #[must_use]
    pub fn config(&self) -> &StopLossConfig {
        &self.config
    }

    /// Stop distance in percent of entry.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for a NEUTRAL direction or a score that is
    /// non-finite or outside [0, 100].
    pub fn stop_loss_percentage(
        &self,
        direction: Direction,
        score: f64,
    ) -> Result<f64, ValidationError> {
        Ok(self.evaluate(direction, score)?.pct)
    }

    /// Stop price: below entry for BUY, above entry for SELL.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for a non-positive or non-finite entry,
    /// plus everything [`Self::stop_loss_percentage`] rejects.
    pub fn stop_loss_price(
        &self,
        entry: f64,
        direction: Direction,
        score: f64,
    ) -> Result<f64, ValidationError> {
        validate_entry(entry)?;
        let pct = self.stop_loss_percentage(direction, score)?;
        Ok(offset(entry, direction, -pct))
    }

    /// Full stop decision with confidence and the sanity-bound flag.
    ///
    /// # Errors
    /// See [`Self::stop_loss_percentage`].
    pub fn evaluate(
        &self,
        direction: Direction,
        score: f64,
    ) -> Result<StopDecision, ValidationError> {
        let settings = self.settings(direction)?;
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange(score));
        }

        let confidence = normalized_confidence(direction, score, settings.threshold);
        let (min_stop, max_stop) = (settings.min_stop(), settings.max_stop());
        let unbounded_pct = max_stop - confidence * (max_stop - min_stop);

        let pct = unbounded_pct.clamp(self.config.min_stop_pct, self.config.max_stop_pct);
        let out_of_range = pct != unbounded_pct;
        if out_of_range {
            tracing::warn!(
                direction = %direction,
                score,
                unbounded_pct,
                bounded_pct = pct,
                min_stop_pct = self.config.min_stop_pct,
                max_stop_pct = self.config.max_stop_pct,
                "Stop loss outside sanity range, clamped"
            );
        }

        Ok(StopDecision {
            pct,
            unbounded_pct,
            confidence,
            out_of_range,
        })
    }

    /// Entry, stop, and profit targets for a directional composite signal.
    ///
    /// Targets sit at the configured multiples of the stop distance on the
    /// profit side of entry.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for a NEUTRAL signal, an invalid entry, or
    /// an out-of-range signal score.
    pub fn trade_parameters(
        &self,
        signal: &CompositeSignal,
        entry: f64,
    ) -> Result<TradeParameters, ValidationError> {
        validate_entry(entry)?;
        let direction = signal.direction;
        let decision = self.evaluate(direction, signal.score)?;

        let targets = self
            .config
            .target_risk_multiples
            .iter()
            .map(|multiple| {
                let pct = decision.pct * multiple;
                TargetPrice {
                    risk_multiple: *multiple,
                    price: offset(entry, direction, pct),
                    pct,
                }
            })
            .filter(|t| t.price > 0.0)
            .collect();

        tracing::debug!(
            symbol = %signal.symbol,
            direction = %direction,
            score = signal.score,
            stop_pct = decision.pct,
            confidence = decision.confidence,
            "Trade parameters derived"
        );

        Ok(TradeParameters {
            symbol: signal.symbol.clone(),
            direction,
            entry_price: entry,
            stop_loss_price: offset(entry, direction, -decision.pct),
            stop_loss_pct: decision.pct,
            targets,
            confidence: decision.confidence,
            out_of_range: decision.out_of_range,
            unbounded_stop_pct: decision.unbounded_pct,
        })
    }

    fn settings(&self, direction: Direction) -> Result<&DirectionalStop, ValidationError> {
        self.config
            .for_direction(direction)
            .ok_or_else(|| ValidationError::UnsupportedDirection(direction.to_string()))
    }
}

/// Position of `score` between the threshold and the extreme end, 0 when the
/// threshold has not been crossed.
#[must_use]
pub fn normalized_confidence(direction: Direction, score: f64, threshold: f64) -> f64 {
    let confidence = match direction {
        Direction::Buy if score > threshold => (score - threshold) / (100.0 - threshold),
        Direction::Sell if score < threshold => (threshold - score) / threshold,
        _ => 0.0,
    };
    confidence.clamp(0.0, 1.0)
}

/// Moves `entry` by `pct` percent in the profit direction of `direction`
/// (negative `pct` moves towards the stop).
fn offset(entry: f64, direction: Direction, pct: f64) -> f64 {
    let sign = match direction {
        Direction::Sell => -1.0,
        _ => 1.0,
    };
    entry * (1.0 + sign * pct / 100.0)
}

fn validate_entry(entry: f64) -> Result<(), ValidationError> {
    if entry.is_finite() && entry > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NonPositivePrice {
            field: "entry_price",
            value: entry,
        })
    }
}
