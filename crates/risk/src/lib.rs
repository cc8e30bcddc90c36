//! Risk parameters for composite signals.

pub mod stop_loss;

pub use stop_loss::{normalized_confidence, StopDecision, StopLossCalculator};
