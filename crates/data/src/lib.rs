//! Persistence for the confluence engine.
//!
//! This crate provides:
//! - Row models for performance records, governor state, audit log and config versions
//! - [`PerformanceStore`] and [`GovernorStateStore`] traits
//! - [`PgStore`], the `PostgreSQL` implementation
//! - [`InMemoryStore`] for tests and dry runs

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::InMemoryStore;
pub use models::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorMode, GovernorStateRecord,
    GovernorTransition, OutcomeSummary, PerformanceRecord, TradeClose, TradeOutcome,
    TransitionActor,
};
pub use postgres::PgStore;
pub use store::{GovernorStateStore, PerformanceStore};
