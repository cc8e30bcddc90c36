//! Monitoring pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use confluence_core::{
    CompositeSignal, ConfigStore, MarketDataProvider, MarketSnapshot, PipelineConfig,
    TradeParameters,
};
use confluence_data::{PerformanceRecord, PerformanceStore};
use confluence_risk::StopLossCalculator;
use confluence_signals::ConfluenceAggregator;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::PipelineError;

/// Result of one successful instrument cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub symbol: String,
    pub signal: CompositeSignal,
    /// Present for actionable signals with a usable entry price.
    pub trade: Option<TradeParameters>,
    /// Performance record id when the signal was recorded as opened.
    pub signal_id: Option<String>,
    pub elapsed_ms: u64,
}

/// Scores a set of instruments against the live configuration.
pub struct MonitoringPipeline {
    provider: Arc<dyn MarketDataProvider>,
    aggregator: ConfluenceAggregator,
    config_store: ConfigStore,
    settings: PipelineConfig,
    performance: Option<Arc<dyn PerformanceStore>>,
}

impl std::fmt::Debug for MonitoringPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringPipeline")
            .field("settings", &self.settings)
            .field("aggregator", &self.aggregator)
            .field("records_opens", &self.performance.is_some())
            .finish_non_exhaustive()
    }
}

impl MonitoringPipeline {
    #[must_use]
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        config_store: ConfigStore,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            aggregator: ConfluenceAggregator::default(),
            config_store,
            settings,
            performance: None,
        }
    }

    #[must_use]
    pub fn with_aggregator(mut self, aggregator: ConfluenceAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Opens a performance record for every actionable signal.
    #[must_use]
    pub fn with_performance_store(mut self, store: Arc<dyn PerformanceStore>) -> Self {
        self.performance = Some(store);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    /// Fetches price history, order book, trades and sentiment concurrently.
    ///
    /// Only the price history is required. A missing book or tape leaves the
    /// snapshot without it and the affected categories degrade.
    ///
    /// # Errors
    /// Returns [`PipelineError::Fetch`] if the price history is unavailable.
    pub async fn fetch_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, PipelineError> {
        let (ohlcv, orderbook, trades, sentiment) = tokio::join!(
            self.provider.get_multi_timeframe_ohlcv(symbol),
            self.provider.get_orderbook(symbol),
            self.provider.get_recent_trades(symbol),
            self.provider.get_sentiment(symbol),
        );

        let ohlcv = ohlcv.map_err(|e| PipelineError::Fetch {
            symbol: symbol.to_string(),
            message: format!("{e:#}"),
        })?;

        let mut snapshot = MarketSnapshot::new(symbol, Utc::now());
        for (tf, candles) in ohlcv {
            snapshot = snapshot.with_candles(tf, candles);
        }
        match orderbook {
            Ok(book) => snapshot = snapshot.with_orderbook(book),
            Err(e) => tracing::warn!(symbol, error = %e, "Order book unavailable"),
        }
        match trades {
            Ok(trades) => snapshot = snapshot.with_trades(trades),
            Err(e) => tracing::warn!(symbol, error = %e, "Trade tape unavailable"),
        }
        match sentiment {
            Ok(Some(inputs)) => snapshot = snapshot.with_sentiment(inputs),
            Ok(None) => {}
            Err(e) => tracing::debug!(symbol, error = %e, "Sentiment inputs unavailable"),
        }
        Ok(snapshot)
    }

    /// One cycle for one instrument. Reads the live configuration once.
    ///
    /// # Errors
    /// Returns an error if the price history cannot be fetched or the
    /// aggregator rejects its inputs.
    pub async fn run_cycle(&self, symbol: &str) -> Result<CycleReport, PipelineError> {
        let started = Instant::now();
        let config = self.config_store.current();
        let snapshot = self.fetch_snapshot(symbol).await?;

        let signal = self
            .aggregator
            .analyze(&snapshot, &config)
            .map_err(|source| PipelineError::Validation {
                symbol: symbol.to_string(),
                source,
            })?;

        let trade = if signal.is_actionable() {
            match snapshot.last_price() {
                Some(entry) => match StopLossCalculator::from_version(&config)
                    .trade_parameters(&signal, entry)
                {
                    Ok(trade) => Some(trade),
                    Err(e) => {
                        tracing::warn!(symbol, error = %e, "Could not derive trade parameters");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let signal_id = match &trade {
            Some(trade) => self.record_open(&signal, trade).await,
            None => None,
        };

        tracing::info!(
            symbol,
            direction = %signal.direction,
            score = format!("{:.1}", signal.score),
            degraded = signal.degraded,
            stop_pct = trade.as_ref().map(|t| t.stop_loss_pct),
            config_version = config.version,
            "{}",
            signal.interpretation
        );

        Ok(CycleReport {
            symbol: symbol.to_string(),
            signal,
            trade,
            signal_id,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn record_open(&self, signal: &CompositeSignal, trade: &TradeParameters) -> Option<String> {
        let store = self.performance.as_ref()?;
        let entry = match Decimal::try_from(trade.entry_price) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(symbol = %signal.symbol, error = %e, "Entry price not representable");
                return None;
            }
        };
        let signal_id = format!(
            "{}-{}-v{}",
            signal.symbol,
            signal.timestamp.timestamp_millis(),
            signal.config_version
        );
        let record = PerformanceRecord::open(
            &signal_id,
            &signal.symbol,
            signal.direction,
            entry,
            signal.timestamp,
        );
        match store.record_open(&record).await {
            Ok(true) => Some(signal_id),
            Ok(false) => {
                tracing::debug!(signal_id, "Signal already recorded");
                Some(signal_id)
            }
            Err(e) => {
                tracing::warn!(signal_id, error = %e, "Failed to record signal open");
                None
            }
        }
    }

    /// [`Self::run_cycle`] under the configured deadline.
    ///
    /// # Errors
    /// Returns [`PipelineError::Timeout`] if the deadline passes first.
    pub async fn run_cycle_with_timeout(&self, symbol: &str) -> Result<CycleReport, PipelineError> {
        let secs = self.settings.cycle_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), self.run_cycle(symbol))
            .await
            .map_err(|_| PipelineError::Timeout {
                symbol: symbol.to_string(),
                secs,
            })?
    }

    /// Runs one cycle for every configured symbol, at most
    /// `max_concurrent_instruments` at a time. Results arrive in completion order.
    pub async fn run_all(&self) -> Vec<Result<CycleReport, PipelineError>> {
        let limit = self.settings.max_concurrent_instruments.max(1);
        let cycles: Vec<_> = self
            .settings
            .symbols
            .iter()
            .map(|symbol| self.run_cycle_with_timeout(symbol))
            .collect();
        stream::iter(cycles)
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Repeats [`Self::run_all`] every `cycle_interval_secs` until `shutdown`
    /// flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.settings.cycle_interval_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            symbols = ?self.settings.symbols,
            interval_secs = self.settings.cycle_interval_secs,
            "Monitoring pipeline started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let results = self.run_all().await;
                    let failed = results.iter().filter(|r| r.is_err()).count();
                    for err in results.iter().filter_map(|r| r.as_ref().err()) {
                        tracing::warn!(symbol = err.symbol(), error = %err, "Cycle failed");
                    }
                    tracing::debug!(ok = results.len() - failed, failed, "Monitoring round complete");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Monitoring pipeline stopped");
    }
}
