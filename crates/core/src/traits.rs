use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;

use crate::market::{Candle, OrderBookSnapshot, SentimentInputs, Timeframe, TradePrint};

/// Source of market data for one instrument per cycle.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_multi_timeframe_ohlcv(
        &self,
        symbol: &str,
    ) -> Result<BTreeMap<Timeframe, Vec<Candle>>>;

    async fn get_orderbook(&self, symbol: &str) -> Result<OrderBookSnapshot>;

    async fn get_recent_trades(&self, symbol: &str) -> Result<Vec<TradePrint>>;

    /// Funding / positioning data. Providers without derivatives data keep the default.
    async fn get_sentiment(&self, _symbol: &str) -> Result<Option<SentimentInputs>> {
        Ok(None)
    }
}

/// Fire-and-forget destination for critical alerts.
///
/// Callers log failures and never propagate them.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_critical_alert(
        &self,
        title: &str,
        message: &str,
        details: &HashMap<String, String>,
    ) -> Result<()>;
}
