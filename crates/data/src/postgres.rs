//! `PostgreSQL` implementation of the storage traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confluence_core::{DatabaseConfig, Direction};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::models::{
    ConfigVersionRecord, GovernorAuditRecord, GovernorMetrics, GovernorMode, GovernorStateRecord,
    GovernorTransition, OutcomeSummary, PerformanceRecord, TradeClose,
};
use crate::store::{GovernorStateStore, PerformanceStore};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS performance_records (
        signal_id TEXT PRIMARY KEY,
        symbol TEXT NOT NULL,
        direction TEXT NOT NULL,
        open_timestamp TIMESTAMPTZ NOT NULL,
        entry_price NUMERIC NOT NULL,
        close_timestamp TIMESTAMPTZ,
        outcome TEXT,
        close_price NUMERIC,
        pnl_pct NUMERIC
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS performance_records_closed_idx
        ON performance_records (direction, close_timestamp)
        WHERE close_timestamp IS NOT NULL
    ",
    r"
    CREATE TABLE IF NOT EXISTS governor_state (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        mode TEXT NOT NULL,
        activated_at TIMESTAMPTZ,
        activation_reason TEXT,
        win_rate DOUBLE PRECISION,
        closed_count BIGINT,
        last_check_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS governor_audit (
        id BIGSERIAL PRIMARY KEY,
        recorded_at TIMESTAMPTZ NOT NULL,
        from_mode TEXT NOT NULL,
        to_mode TEXT NOT NULL,
        reason TEXT NOT NULL,
        win_rate DOUBLE PRECISION,
        closed_count BIGINT,
        actor TEXT NOT NULL,
        config_version BIGINT,
        details JSONB
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS config_versions (
        version BIGINT PRIMARY KEY,
        published_at TIMESTAMPTZ NOT NULL,
        source TEXT NOT NULL,
        multiplier_mode TEXT NOT NULL,
        config JSONB NOT NULL
    )
    ",
];

/// Both storage traits over one connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the specified `PostgreSQL` database.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Connects using the `[database]` config section.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(&config.url, config.max_connections).await
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the confluence tables if they do not exist.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::debug!(tables = 4, "Schema ensured");
        Ok(())
    }
}

#[async_trait]
impl PerformanceStore for PgStore {
    async fn record_open(&self, record: &PerformanceRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO performance_records
                (signal_id, symbol, direction, open_timestamp, entry_price,
                 close_timestamp, outcome, close_price, pnl_pct)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (signal_id) DO NOTHING
            ",
        )
        .bind(&record.signal_id)
        .bind(&record.symbol)
        .bind(&record.direction)
        .bind(record.open_timestamp)
        .bind(record.entry_price)
        .bind(record.close_timestamp)
        .bind(&record.outcome)
        .bind(record.close_price)
        .bind(record.pnl_pct)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_close(&self, signal_id: &str, close: &TradeClose) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE performance_records
            SET close_timestamp = $2, outcome = $3, close_price = $4, pnl_pct = $5
            WHERE signal_id = $1 AND close_timestamp IS NULL
            ",
        )
        .bind(signal_id)
        .bind(close.closed_at)
        .bind(close.outcome.as_str())
        .bind(close.close_price)
        .bind(close.pnl_pct)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, signal_id: &str) -> Result<Option<PerformanceRecord>> {
        let record = sqlx::query_as::<_, PerformanceRecord>(
            r"
            SELECT signal_id, symbol, direction, open_timestamp, entry_price,
                   close_timestamp, outcome, close_price, pnl_pct
            FROM performance_records
            WHERE signal_id = $1
            ",
        )
        .bind(signal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn closed_since(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>> {
        let records = sqlx::query_as::<_, PerformanceRecord>(
            r"
            SELECT signal_id, symbol, direction, open_timestamp, entry_price,
                   close_timestamp, outcome, close_price, pnl_pct
            FROM performance_records
            WHERE direction = $1 AND close_timestamp IS NOT NULL AND close_timestamp >= $2
            ORDER BY close_timestamp ASC
            ",
        )
        .bind(direction.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn outcome_summary(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<OutcomeSummary> {
        let (closed, wins, losses, breakevens): (i64, i64, i64, i64) = sqlx::query_as(
            r"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE outcome = 'win'),
                   COUNT(*) FILTER (WHERE outcome = 'loss'),
                   COUNT(*) FILTER (WHERE outcome = 'breakeven')
            FROM performance_records
            WHERE direction = $1 AND close_timestamp IS NOT NULL AND close_timestamp >= $2
            ",
        )
        .bind(direction.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutcomeSummary {
            closed: u64::try_from(closed)?,
            wins: u64::try_from(wins)?,
            losses: u64::try_from(losses)?,
            breakevens: u64::try_from(breakevens)?,
        })
    }
}

#[async_trait]
impl GovernorStateStore for PgStore {
    async fn load_state(&self) -> Result<Option<GovernorStateRecord>> {
        let state = sqlx::query_as::<_, GovernorStateRecord>(
            r"
            SELECT mode, activated_at, activation_reason, win_rate, closed_count,
                   last_check_at, updated_at
            FROM governor_state
            WHERE id = 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn save_metrics(&self, metrics: &GovernorMetrics) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO governor_state
                (id, mode, win_rate, closed_count, last_check_at, updated_at)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET win_rate = EXCLUDED.win_rate,
                closed_count = EXCLUDED.closed_count,
                last_check_at = EXCLUDED.last_check_at,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(GovernorMode::Monitoring.as_str())
        .bind(metrics.win_rate)
        .bind(metrics.closed_count)
        .bind(metrics.last_check_at)
        .bind(metrics.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn persist_transition(&self, transition: &GovernorTransition) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        upsert_state(&mut *tx, &transition.state).await?;

        if let Some(version) = &transition.config_version {
            sqlx::query(
                r"
                INSERT INTO config_versions (version, published_at, source, multiplier_mode, config)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(version.version)
            .bind(version.published_at)
            .bind(&version.source)
            .bind(&version.multiplier_mode)
            .bind(&version.config)
            .execute(&mut *tx)
            .await?;
        }

        let audit = &transition.audit;
        sqlx::query(
            r"
            INSERT INTO governor_audit
                (recorded_at, from_mode, to_mode, reason, win_rate, closed_count,
                 actor, config_version, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(audit.recorded_at)
        .bind(&audit.from_mode)
        .bind(&audit.to_mode)
        .bind(&audit.reason)
        .bind(audit.win_rate)
        .bind(audit.closed_count)
        .bind(&audit.actor)
        .bind(audit.config_version)
        .bind(&audit.details)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_config_version(&self) -> Result<Option<ConfigVersionRecord>> {
        let record = sqlx::query_as::<_, ConfigVersionRecord>(
            r"
            SELECT version, published_at, source, multiplier_mode, config
            FROM config_versions
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn audit_log(&self, limit: usize) -> Result<Vec<GovernorAuditRecord>> {
        let records = sqlx::query_as::<_, GovernorAuditRecord>(
            r"
            SELECT id, recorded_at, from_mode, to_mode, reason, win_rate, closed_count,
                   actor, config_version, details
            FROM governor_audit
            ORDER BY id DESC
            LIMIT $1
            ",
        )
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

async fn upsert_state<'e, E>(executor: E, state: &GovernorStateRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO governor_state
            (id, mode, activated_at, activation_reason, win_rate, closed_count,
             last_check_at, updated_at)
        VALUES (1, $1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET mode = EXCLUDED.mode,
            activated_at = EXCLUDED.activated_at,
            activation_reason = EXCLUDED.activation_reason,
            win_rate = EXCLUDED.win_rate,
            closed_count = EXCLUDED.closed_count,
            last_check_at = EXCLUDED.last_check_at,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(&state.mode)
    .bind(state.activated_at)
    .bind(&state.activation_reason)
    .bind(state.win_rate)
    .bind(state.closed_count)
    .bind(state.last_check_at)
    .bind(state.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}
