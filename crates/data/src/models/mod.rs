//! Row types for the confluence tables.

pub mod governor;
pub mod performance;

pub use governor::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorMode, GovernorStateRecord,
    GovernorTransition, TransitionActor,
};
pub use performance::{OutcomeSummary, PerformanceRecord, TradeClose, TradeOutcome};
