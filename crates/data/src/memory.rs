//! In-process store implementing both storage traits.
//!
//! Used by tests and by the CLI when no database is configured. Clones share
//! the same tables.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confluence_core::Direction;
use parking_lot::RwLock;

use crate::models::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorStateRecord,
    GovernorTransition, PerformanceRecord, TradeClose,
};
use crate::store::{GovernorStateStore, PerformanceStore};

#[derive(Debug, Default)]
struct Tables {
    performance: BTreeMap<String, PerformanceRecord>,
    state: Option<GovernorStateRecord>,
    audit: Vec<GovernorAuditRecord>,
    config_versions: BTreeMap<i64, ConfigVersionRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of audit rows written so far.
    #[must_use]
    pub fn audit_len(&self) -> usize {
        self.tables.read().audit.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store marked unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl PerformanceStore for InMemoryStore {
    async fn record_open(&self, record: &PerformanceRecord) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables.performance.contains_key(&record.signal_id) {
            return Ok(false);
        }
        tables
            .performance
            .insert(record.signal_id.clone(), record.clone());
        Ok(true)
    }

    async fn record_close(&self, signal_id: &str, close: &TradeClose) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write();
        Ok(tables
            .performance
            .get_mut(signal_id)
            .is_some_and(|record| record.apply_close(close)))
    }

    async fn get(&self, signal_id: &str) -> Result<Option<PerformanceRecord>> {
        self.check_available()?;
        Ok(self.tables.read().performance.get(signal_id).cloned())
    }

    async fn closed_since(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut records: Vec<PerformanceRecord> = tables
            .performance
            .values()
            .filter(|r| r.direction() == Some(direction))
            .filter(|r| r.close_timestamp.is_some_and(|at| at >= since))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.close_timestamp);
        Ok(records)
    }
}

#[async_trait]
impl GovernorStateStore for InMemoryStore {
    async fn load_state(&self) -> Result<Option<GovernorStateRecord>> {
        self.check_available()?;
        Ok(self.tables.read().state.clone())
    }

    async fn save_metrics(&self, metrics: &GovernorMetrics) -> Result<()> {
        self.check_available()?;
        self.tables
            .write()
            .state
            .get_or_insert_with(|| GovernorStateRecord::monitoring(metrics.updated_at))
            .apply_metrics(metrics);
        Ok(())
    }

    async fn persist_transition(&self, transition: &GovernorTransition) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if let Some(version) = &transition.config_version {
            if tables.config_versions.contains_key(&version.version) {
                bail!("config version {} already stored", version.version);
            }
        }
        tables.state = Some(transition.state.clone());
        if let Some(version) = &transition.config_version {
            tables
                .config_versions
                .insert(version.version, version.clone());
        }
        let mut audit = transition.audit.clone();
        audit.id = i64::try_from(tables.audit.len())? + 1;
        tables.audit.push(audit);
        Ok(())
    }

    async fn latest_config_version(&self) -> Result<Option<ConfigVersionRecord>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .config_versions
            .values()
            .next_back()
            .cloned())
    }

    async fn audit_log(&self, limit: usize) -> Result<Vec<GovernorAuditRecord>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .audit
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
