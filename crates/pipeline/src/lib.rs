//! Monitoring cycles: fetch a snapshot, score it, size the stop.
//!
//! One cycle per instrument, instruments processed concurrently under a
//! bounded worker pool, every cycle under its own deadline.

pub mod error;
pub mod monitor;
pub mod provider;

pub use error::PipelineError;
pub use monitor::{CycleReport, MonitoringPipeline};
pub use provider::{load_snapshot, FileSnapshotProvider};
