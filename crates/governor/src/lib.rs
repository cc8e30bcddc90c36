//! Kill-switch governance over realized signal performance.
//!
//! [`PerformanceGovernor`] watches closed signals of one direction and reverts
//! that direction's stop multipliers to their legacy values when the win rate
//! degrades. See [`kill_switch`] for the transition rules.

pub mod alert;
pub mod kill_switch;
pub mod status;

pub use alert::TracingAlertSink;
pub use kill_switch::PerformanceGovernor;
pub use status::{
    ActivationView, Evaluation, GovernorStatus, MultiplierView, PerformanceView, ThresholdView,
};
