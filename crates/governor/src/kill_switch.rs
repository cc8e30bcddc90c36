//! Performance kill switch.
//!
//! Audits realized outcomes of the governed direction and, when the win rate
//! over the lookback window falls strictly below the configured minimum with
//! enough closed signals, reverts that direction's stop multipliers to their
//! legacy values:
//!
//! 1. The ACTIVE state, an audit row and the new config version are persisted
//!    in one transaction.
//! 2. The new version is published through the [`ConfigStore`].
//! 3. A critical alert is sent (best effort).
//!
//! ACTIVE is sticky: only a manual deactivation returns to MONITORING, and it
//! leaves the multipliers where they are.
//!
//! The persisted state row is shared with other processes (the CLI can
//! activate or deactivate while a monitor runs). Evaluations write only their
//! metrics to it, and every transition first adopts the persisted mode.
//!
//! Every public entry point is fail-safe. Storage failures are logged,
//! resolve to "no state change" and surface only as
//! [`GovernorStatus::last_error`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use confluence_core::stats::wilson_ci;
use confluence_core::{
    AlertSink, ConfigError, ConfigStore, ConfigVersion, FatalPersistenceError, GovernorConfig,
    MultiplierMode,
};
use confluence_data::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorMode, GovernorStateRecord,
    GovernorStateStore, GovernorTransition, OutcomeSummary, PerformanceStore, TransitionActor,
};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};

use crate::status::{
    ActivationView, Evaluation, GovernorStatus, MultiplierView, PerformanceView, ThresholdView,
};

/// z for a 95% interval.
const WILSON_Z: f64 = 1.96;

/// Upper bound on the run loop's poll period. Evaluations are still throttled
/// to `check_interval_secs`.
const MAX_POLL_SECS: u64 = 60;

const ACTIVATION_SOURCE: &str = "kill switch activation";

// =============================================================================
// Runtime State
// =============================================================================

#[derive(Debug, Clone)]
struct Runtime {
    mode: GovernorMode,
    activated_at: Option<DateTime<Utc>>,
    activation_reason: Option<String>,
    /// Last evaluation that actually read the store.
    last_evaluation: Option<Evaluation>,
    last_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            mode: GovernorMode::Monitoring,
            activated_at: None,
            activation_reason: None,
            last_evaluation: None,
            last_check_at: None,
            last_error: None,
        }
    }

    fn to_metrics(&self, now: DateTime<Utc>) -> GovernorMetrics {
        GovernorMetrics {
            win_rate: self.last_evaluation.as_ref().and_then(|e| e.win_rate),
            closed_count: self
                .last_evaluation
                .as_ref()
                .and_then(|e| i64::try_from(e.closed_count).ok()),
            last_check_at: self.last_check_at,
            updated_at: now,
        }
    }

    fn adopt_mode(&mut self, record: &GovernorStateRecord) {
        self.mode = record.mode();
        self.activated_at = record.activated_at;
        self.activation_reason = record.activation_reason.clone();
    }

    fn adopt(&mut self, record: &GovernorStateRecord) {
        self.adopt_mode(record);
        self.last_check_at = record.last_check_at.or(self.last_check_at);
        if let (Some(win_rate), Some(closed)) = (record.win_rate, record.closed_count) {
            let closed_count = u64::try_from(closed).unwrap_or(0);
            // Wins are not persisted; derive them from the rate.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let wins = (win_rate * closed_count as f64).round() as u64;
            self.last_evaluation = Some(Evaluation {
                trigger: false,
                reason: "restored from storage".to_string(),
                win_rate: Some(win_rate),
                closed_count,
                wins,
                throttled: false,
                evaluated_at: record.last_check_at.unwrap_or(record.updated_at),
            });
        }
    }
}

// =============================================================================
// Performance Governor
// =============================================================================

/// Kill switch over realized signal performance.
///
/// Thread-safe: runtime state sits behind a `parking_lot::RwLock` and state
/// transitions are serialized by an async mutex held across persistence.
pub struct PerformanceGovernor {
    config: GovernorConfig,
    performance: Arc<dyn PerformanceStore>,
    state_store: Arc<dyn GovernorStateStore>,
    config_store: ConfigStore,
    alerts: Arc<dyn AlertSink>,
    runtime: RwLock<Runtime>,
    transition: Mutex<()>,
}

impl std::fmt::Debug for PerformanceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runtime = self.runtime.read();
        f.debug_struct("PerformanceGovernor")
            .field("config", &self.config)
            .field("mode", &runtime.mode)
            .field("last_check_at", &runtime.last_check_at)
            .field("last_error", &runtime.last_error)
            .finish()
    }
}

impl PerformanceGovernor {
    /// Creates a governor in MONITORING. Call [`Self::restore`] to pick up
    /// persisted state.
    #[must_use]
    pub fn new(
        config: GovernorConfig,
        performance: Arc<dyn PerformanceStore>,
        state_store: Arc<dyn GovernorStateStore>,
        config_store: ConfigStore,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            performance,
            state_store,
            config_store,
            alerts,
            runtime: RwLock::new(Runtime::new()),
            transition: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    #[must_use]
    pub fn mode(&self) -> GovernorMode {
        self.runtime.read().mode
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mode() == GovernorMode::Active
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluates recent performance of the governed direction.
    ///
    /// # Errors
    /// Returns an error if the performance store cannot be read.
    pub async fn should_trigger(&self) -> Result<Evaluation, FatalPersistenceError> {
        self.should_trigger_at(Utc::now()).await
    }

    /// [`Self::should_trigger`] at an explicit instant.
    ///
    /// A call within `check_interval_secs` of the previous evaluation returns
    /// a throttled "no trigger" without touching the store.
    ///
    /// # Errors
    /// Returns an error if the performance store cannot be read.
    pub async fn should_trigger_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, FatalPersistenceError> {
        let last_check = self.runtime.read().last_check_at;
        if let Some(last) = last_check {
            let interval = i64::try_from(self.config.check_interval_secs).unwrap_or(i64::MAX);
            let elapsed = (now - last).num_seconds();
            if elapsed < interval {
                let remaining = interval - elapsed;
                tracing::debug!(remaining_secs = remaining, "Governor evaluation throttled");
                return Ok(Evaluation::throttled(remaining, now));
            }
        }

        let since = now - Duration::days(self.config.lookback_days);
        let summary = self
            .performance
            .outcome_summary(self.config.governed_direction, since)
            .await
            .map_err(|e| FatalPersistenceError::new("outcome_summary", &e))?;

        let evaluation = self.judge(summary, now);
        tracing::info!(
            direction = %self.config.governed_direction,
            closed = evaluation.closed_count,
            wins = evaluation.wins,
            win_rate = evaluation.win_rate.unwrap_or(f64::NAN),
            trigger = evaluation.trigger,
            reason = %evaluation.reason,
            "Governor evaluation"
        );

        let mut runtime = self.runtime.write();
        runtime.last_check_at = Some(now);
        runtime.last_evaluation = Some(evaluation.clone());
        Ok(evaluation)
    }

    fn judge(&self, summary: OutcomeSummary, now: DateTime<Utc>) -> Evaluation {
        let direction = self.config.governed_direction;
        let min_closed = self.config.min_closed_signals as u64;
        let min_win_rate = self.config.min_win_rate;
        let win_rate = summary.win_rate();

        let (trigger, reason) = match win_rate {
            Some(rate) if summary.closed >= min_closed => {
                if rate < min_win_rate {
                    (
                        true,
                        format!(
                            "{direction} win rate {:.1}% over {} closed signals is below the {:.1}% minimum",
                            rate * 100.0,
                            summary.closed,
                            min_win_rate * 100.0
                        ),
                    )
                } else {
                    (
                        false,
                        format!(
                            "performance healthy: {direction} win rate {:.1}% over {} closed signals (minimum {:.1}%)",
                            rate * 100.0,
                            summary.closed,
                            min_win_rate * 100.0
                        ),
                    )
                }
            }
            _ => (
                false,
                format!(
                    "insufficient data: {} closed {direction} signals in {} days, need {min_closed}",
                    summary.closed, self.config.lookback_days
                ),
            ),
        };

        Evaluation {
            trigger,
            reason,
            win_rate,
            closed_count: summary.closed,
            wins: summary.wins,
            throttled: false,
            evaluated_at: now,
        }
    }

    /// Periodic entry point: evaluate, persist the metrics, activate on trigger.
    ///
    /// Returns `None` when disabled or when the store could not be read.
    /// A transition persisted by another process is adopted before the
    /// trigger is acted on.
    pub async fn check(&self) -> Option<Evaluation> {
        self.check_at(Utc::now()).await
    }

    pub async fn check_at(&self, now: DateTime<Utc>) -> Option<Evaluation> {
        if !self.config.enabled {
            tracing::debug!("Governor disabled, skipping check");
            return None;
        }

        let evaluation = match self.should_trigger_at(now).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                self.record_error(&e);
                return None;
            }
        };
        if evaluation.throttled {
            return Some(evaluation);
        }

        self.save_snapshot(now).await;
        if evaluation.trigger {
            self.activate_at(&evaluation, now).await;
        }
        Some(evaluation)
    }

    async fn save_snapshot(&self, now: DateTime<Utc>) {
        let _guard = self.transition.lock().await;
        let metrics = self.runtime.read().to_metrics(now);
        if let Err(e) = self.state_store.save_metrics(&metrics).await {
            self.record_error(&FatalPersistenceError::new("save_metrics", &e));
            return;
        }
        match self.sync_mode("kill switch sync").await {
            Ok(()) => self.clear_error(),
            Err(e) => self.record_error(&e),
        }
    }

    /// Adopts the persisted mode if another writer changed it. Callers hold
    /// the transition lock.
    async fn sync_mode(&self, source: &str) -> Result<(), FatalPersistenceError> {
        let Some(record) = self
            .state_store
            .load_state()
            .await
            .map_err(|e| FatalPersistenceError::new("load_state", &e))?
        else {
            return Ok(());
        };
        let local = self.mode();
        if record.mode() != local {
            tracing::warn!(
                local = local.as_str(),
                persisted = %record.mode,
                "Kill-switch mode changed by another writer, adopting persisted state"
            );
            self.runtime.write().adopt_mode(&record);
            if record.is_active() {
                self.ensure_legacy(source);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Trips the kill switch using the metrics of `evaluation`.
    ///
    /// Returns true only for a genuine MONITORING to ACTIVE transition.
    /// Throttled evaluations and evaluations without a win rate are refused.
    pub async fn activate(&self, evaluation: &Evaluation) -> bool {
        self.activate_at(evaluation, Utc::now()).await
    }

    pub async fn activate_at(&self, evaluation: &Evaluation, now: DateTime<Utc>) -> bool {
        if evaluation.throttled {
            tracing::warn!("Throttled evaluation carries no metrics, activation refused");
            return false;
        }
        let Some(win_rate) = evaluation.win_rate else {
            tracing::warn!(
                closed = evaluation.closed_count,
                "Evaluation has no win rate, activation refused"
            );
            return false;
        };

        let guard = self.transition.lock().await;
        if let Err(e) = self.sync_mode(ACTIVATION_SOURCE).await {
            self.record_error(&e);
            return false;
        }
        if self.is_active() {
            tracing::info!("Kill switch already active, activation ignored");
            return false;
        }

        let next = match self.persist_activation(evaluation, win_rate, now).await {
            Ok(next) => next,
            Err(e) => {
                self.record_error(&e);
                return false;
            }
        };
        {
            let mut runtime = self.runtime.write();
            runtime.mode = GovernorMode::Active;
            runtime.activated_at = Some(now);
            runtime.activation_reason = Some(evaluation.reason.clone());
            runtime.last_error = None;
        }
        let version = self.publish_activation(next);
        drop(guard);

        tracing::error!(
            direction = %self.config.governed_direction,
            win_rate,
            closed = evaluation.closed_count,
            min_win_rate = self.config.min_win_rate,
            config_version = version,
            reason = %evaluation.reason,
            "KILL SWITCH ACTIVATED: legacy stop multipliers restored"
        );

        let details = HashMap::from([
            (
                "direction".to_string(),
                self.config.governed_direction.to_string(),
            ),
            ("win_rate".to_string(), format!("{win_rate:.4}")),
            (
                "closed_count".to_string(),
                evaluation.closed_count.to_string(),
            ),
            (
                "min_win_rate".to_string(),
                format!("{:.4}", self.config.min_win_rate),
            ),
            (
                "lookback_days".to_string(),
                self.config.lookback_days.to_string(),
            ),
            (
                "config_version".to_string(),
                version.map_or_else(|| "unpublished".to_string(), |v| v.to_string()),
            ),
        ]);
        if let Err(e) = self
            .alerts
            .send_critical_alert("Kill switch activated", &evaluation.reason, &details)
            .await
        {
            tracing::warn!(error = %e, "Critical alert delivery failed");
        }
        true
    }

    async fn persist_activation(
        &self,
        evaluation: &Evaluation,
        win_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<ConfigVersion, FatalPersistenceError> {
        // Another process may have persisted versions since startup.
        if let Some(latest) = self
            .state_store
            .latest_config_version()
            .await
            .map_err(|e| FatalPersistenceError::new("latest_config_version", &e))?
        {
            self.config_store.advance_past(u64::try_from(latest.version).unwrap_or(0));
        }

        let direction = self.config.governed_direction;
        let legacy = self.config.legacy_multipliers;
        let next = self.config_store.current().with_governed_multipliers(
            direction,
            legacy,
            MultiplierMode::Legacy,
            ACTIVATION_SOURCE,
        );
        let version_record = ConfigVersionRecord::from_version(&next)
            .map_err(|e| FatalPersistenceError::new("serialize config version", &e))?;

        let closed = i64::try_from(evaluation.closed_count).unwrap_or(i64::MAX);
        let mut audit = GovernorAuditRecord::new(
            GovernorMode::Monitoring,
            GovernorMode::Active,
            &evaluation.reason,
            TransitionActor::Governor,
            now,
        )
        .with_metrics(win_rate, closed)
        .with_details(serde_json::json!({
            "direction": direction.as_str(),
            "wins": evaluation.wins,
            "min_win_rate": self.config.min_win_rate,
            "min_closed_signals": self.config.min_closed_signals,
            "lookback_days": self.config.lookback_days,
            "legacy_multipliers": legacy,
        }));
        audit.config_version = Some(version_record.version);

        let mut state = GovernorStateRecord::active(&evaluation.reason, win_rate, closed, now);
        state.last_check_at = self.runtime.read().last_check_at.or(Some(now));

        self.state_store
            .persist_transition(&GovernorTransition {
                state,
                audit,
                config_version: Some(version_record),
            })
            .await
            .map_err(|e| FatalPersistenceError::new("persist_transition", &e))?;
        Ok(next)
    }

    /// Publishes the persisted version, rebasing onto whatever is current if
    /// another writer got there first.
    fn publish_activation(&self, next: ConfigVersion) -> Option<u64> {
        match self.config_store.publish(next) {
            Ok(published) => Some(published.version),
            Err(ConfigError::VersionConflict { expected, found }) => {
                tracing::warn!(
                    expected,
                    found,
                    "Config moved during activation, rebasing legacy multipliers"
                );
                self.apply_legacy(ACTIVATION_SOURCE)
            }
            Err(e) => {
                self.publish_failed(&e);
                None
            }
        }
    }

    fn apply_legacy(&self, source: &str) -> Option<u64> {
        let direction = self.config.governed_direction;
        let legacy = self.config.legacy_multipliers;
        match self.config_store.update(|current| {
            current.with_governed_multipliers(direction, legacy, MultiplierMode::Legacy, source)
        }) {
            Ok(published) => Some(published.version),
            Err(e) => {
                self.publish_failed(&e);
                None
            }
        }
    }

    fn publish_failed(&self, err: &ConfigError) {
        tracing::error!(error = %err, "Failed to publish legacy stop multipliers");
        self.runtime.write().last_error = Some(format!("config publish failed: {err}"));
    }

    /// Returns to MONITORING. Refused unless `manual_override` is set.
    ///
    /// Multipliers stay at their legacy values until an operator changes the
    /// configuration.
    pub async fn deactivate(&self, manual_override: bool) -> bool {
        self.deactivate_at(manual_override, Utc::now()).await
    }

    pub async fn deactivate_at(&self, manual_override: bool, now: DateTime<Utc>) -> bool {
        if !manual_override {
            tracing::warn!("Kill switch deactivation refused without manual override");
            return false;
        }

        let _guard = self.transition.lock().await;
        if let Err(e) = self.sync_mode("kill switch sync").await {
            self.record_error(&e);
            return false;
        }
        if !self.is_active() {
            tracing::info!("Kill switch not active, nothing to deactivate");
            return false;
        }

        let reason = "manual deactivation";
        let (state, audit) = {
            let mut state = GovernorStateRecord::monitoring(now);
            state.apply_metrics(&self.runtime.read().to_metrics(now));

            let mut audit = GovernorAuditRecord::new(
                GovernorMode::Active,
                GovernorMode::Monitoring,
                reason,
                TransitionActor::Manual,
                now,
            );
            if let (Some(win_rate), Some(closed)) = (state.win_rate, state.closed_count) {
                audit = audit.with_metrics(win_rate, closed);
            }
            (state, audit)
        };

        if let Err(e) = self
            .state_store
            .persist_transition(&GovernorTransition {
                state,
                audit,
                config_version: None,
            })
            .await
        {
            self.record_error(&FatalPersistenceError::new("persist_transition", &e));
            return false;
        }

        {
            let mut runtime = self.runtime.write();
            runtime.mode = GovernorMode::Monitoring;
            runtime.activated_at = None;
            runtime.activation_reason = None;
            runtime.last_error = None;
        }
        tracing::warn!(
            mode = self.config_store.current().multiplier_mode.as_str(),
            "Kill switch deactivated manually, stop multipliers left unchanged"
        );
        true
    }

    // -------------------------------------------------------------------------
    // Persistence sync
    // -------------------------------------------------------------------------

    /// Loads persisted state at startup. The live config is renumbered past
    /// the highest persisted version, then, when the state is ACTIVE, the
    /// legacy multipliers are re-applied if they are not already in force.
    /// Returns false if the store could not be read.
    pub async fn restore(&self) -> bool {
        let _guard = self.transition.lock().await;
        let record = match self.state_store.load_state().await {
            Ok(record) => record,
            Err(e) => {
                self.record_error(&FatalPersistenceError::new("load_state", &e));
                return false;
            }
        };
        let latest = match self.state_store.latest_config_version().await {
            Ok(latest) => latest,
            Err(e) => {
                self.record_error(&FatalPersistenceError::new("latest_config_version", &e));
                return false;
            }
        };

        if let Some(latest) = latest {
            tracing::debug!(
                version = latest.version,
                mode = %latest.multiplier_mode,
                source = %latest.source,
                "Last persisted config version"
            );
            self.config_store.advance_past(u64::try_from(latest.version).unwrap_or(0));
        }

        match record {
            Some(record) => {
                self.adopt(&record, "kill switch restore");
                tracing::info!(mode = %record.mode, "Governor state restored");
            }
            None => tracing::info!("No persisted governor state, starting in MONITORING"),
        }

        self.clear_error();
        true
    }

    /// Re-reads persisted state, then returns the status. On failure the
    /// last-known state is returned with the error marker set.
    pub async fn refresh_status(&self) -> GovernorStatus {
        {
            let _guard = self.transition.lock().await;
            match self.state_store.load_state().await {
                Ok(Some(record)) => {
                    self.adopt(&record, "kill switch refresh");
                    self.clear_error();
                }
                Ok(None) => self.clear_error(),
                Err(e) => self.record_error(&FatalPersistenceError::new("load_state", &e)),
            }
        }
        self.status()
    }

    fn adopt(&self, record: &GovernorStateRecord, source: &str) {
        self.runtime.write().adopt(record);
        if record.is_active() {
            self.ensure_legacy(source);
        }
    }

    fn ensure_legacy(&self, source: &str) {
        let current = self.config_store.current();
        let legacy_in_force = current.multiplier_mode == MultiplierMode::Legacy
            && current.multipliers(self.config.governed_direction)
                == Some(self.config.legacy_multipliers);
        if !legacy_in_force {
            if let Some(version) = self.apply_legacy(source) {
                tracing::warn!(version, "Re-applied legacy multipliers for active kill switch");
            }
        }
    }

    /// Last-known state. Never touches storage.
    #[must_use]
    pub fn status(&self) -> GovernorStatus {
        let runtime = self.runtime.read().clone();
        let live = self.config_store.current();
        let direction = self.config.governed_direction;

        let performance = match &runtime.last_evaluation {
            Some(eval) => PerformanceView {
                win_rate: eval.win_rate,
                closed_count: eval.closed_count,
                wins: eval.wins,
                lookback_days: self.config.lookback_days,
                win_rate_ci: (eval.closed_count > 0).then(|| {
                    wilson_ci(
                        usize::try_from(eval.wins).unwrap_or(usize::MAX),
                        usize::try_from(eval.closed_count).unwrap_or(usize::MAX),
                        WILSON_Z,
                    )
                }),
                evaluated_at: Some(eval.evaluated_at),
            },
            None => PerformanceView {
                win_rate: None,
                closed_count: 0,
                wins: 0,
                lookback_days: self.config.lookback_days,
                win_rate_ci: None,
                evaluated_at: None,
            },
        };

        GovernorStatus {
            mode: runtime.mode,
            is_active: runtime.mode == GovernorMode::Active,
            enabled: self.config.enabled,
            performance,
            thresholds: ThresholdView {
                governed_direction: direction,
                min_win_rate: self.config.min_win_rate,
                min_closed_signals: self.config.min_closed_signals,
                check_interval_secs: self.config.check_interval_secs,
            },
            multipliers: MultiplierView {
                legacy: self.config.legacy_multipliers,
                new: self.config.enhanced_multipliers,
                current_mode: live.multiplier_mode,
                in_force: live.multipliers(direction),
                config_version: live.version,
            },
            activation: runtime
                .activated_at
                .zip(runtime.activation_reason)
                .map(|(activated_at, reason)| ActivationView {
                    activated_at,
                    reason,
                }),
            last_check_at: runtime.last_check_at,
            last_error: runtime.last_error,
        }
    }

    /// Drives [`Self::check`] until `shutdown` flips to true or its sender
    /// is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.check_interval_secs.clamp(1, MAX_POLL_SECS);
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(period));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            poll_secs = period,
            check_interval_secs = self.config.check_interval_secs,
            "Governor loop started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Governor loop stopped");
    }

    // -------------------------------------------------------------------------
    // Error marker
    // -------------------------------------------------------------------------

    fn record_error(&self, err: &FatalPersistenceError) {
        tracing::error!(
            operation = %err.operation,
            error = %err.message,
            "Governor persistence failure, no state change"
        );
        self.runtime.write().last_error = Some(err.to_string());
    }

    fn clear_error(&self) {
        self.runtime.write().last_error = None;
    }
}
