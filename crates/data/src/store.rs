//! Storage traits consumed by the governor and the monitoring pipeline.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confluence_core::Direction;

use crate::models::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorStateRecord,
    GovernorTransition, OutcomeSummary, PerformanceRecord, TradeClose,
};

/// Signal lifecycle storage.
#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// Inserts an open record. Returns false if the signal id already exists.
    async fn record_open(&self, record: &PerformanceRecord) -> Result<bool>;

    /// Closes an open record. Returns false if the record is unknown or
    /// already closed; a second close never overwrites the first.
    async fn record_close(&self, signal_id: &str, close: &TradeClose) -> Result<bool>;

    async fn get(&self, signal_id: &str) -> Result<Option<PerformanceRecord>>;

    /// Closed records for `direction` with a close timestamp at or after `since`,
    /// oldest first.
    async fn closed_since(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>>;

    /// Outcome counts over the same window as [`Self::closed_since`].
    async fn outcome_summary(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<OutcomeSummary> {
        let records = self.closed_since(direction, since).await?;
        Ok(OutcomeSummary::from_records(&records))
    }
}

/// Kill-switch state storage.
#[async_trait]
pub trait GovernorStateStore: Send + Sync {
    /// The persisted state, or `None` before the first write.
    async fn load_state(&self) -> Result<Option<GovernorStateRecord>>;

    /// Updates only the evaluation metrics of the state row, creating a
    /// MONITORING row if none exists. Mode and activation columns are never
    /// written here.
    async fn save_metrics(&self, metrics: &GovernorMetrics) -> Result<()>;

    /// Writes the state, the audit row and the optional config version in one
    /// transaction. Either all of them are stored or none is. Config versions
    /// are append-only: an already stored version number fails the transaction.
    async fn persist_transition(&self, transition: &GovernorTransition) -> Result<()>;

    async fn latest_config_version(&self) -> Result<Option<ConfigVersionRecord>>;

    /// Most recent audit rows, newest first.
    async fn audit_log(&self, limit: usize) -> Result<Vec<GovernorAuditRecord>>;
}
