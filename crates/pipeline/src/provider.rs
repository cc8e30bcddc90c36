//! Market data from JSON snapshot files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use confluence_core::{
    Candle, MarketDataProvider, MarketSnapshot, OrderBookSnapshot, SentimentInputs, Timeframe,
    TradePrint,
};

/// Reads a serialized [`MarketSnapshot`].
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid snapshot.
pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<MarketSnapshot> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
}

/// Serves `<dir>/<SYMBOL>.json` as the latest market state for `SYMBOL`.
///
/// The file is re-read on every call, so an external writer can refresh it
/// between cycles.
#[derive(Debug, Clone)]
pub struct FileSnapshotProvider {
    dir: PathBuf,
}

impl FileSnapshotProvider {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.json"))
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        load_snapshot(self.path_for(symbol)).await
    }
}

#[async_trait]
impl MarketDataProvider for FileSnapshotProvider {
    async fn get_multi_timeframe_ohlcv(
        &self,
        symbol: &str,
    ) -> Result<BTreeMap<Timeframe, Vec<Candle>>> {
        let snapshot = self.snapshot(symbol).await?;
        if snapshot.ohlcv.values().all(Vec::is_empty) {
            return Err(anyhow!("snapshot for {symbol} has no candles"));
        }
        Ok(snapshot.ohlcv)
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<OrderBookSnapshot> {
        self.snapshot(symbol)
            .await?
            .orderbook
            .ok_or_else(|| anyhow!("snapshot for {symbol} has no order book"))
    }

    async fn get_recent_trades(&self, symbol: &str) -> Result<Vec<TradePrint>> {
        Ok(self.snapshot(symbol).await?.trades)
    }

    async fn get_sentiment(&self, symbol: &str) -> Result<Option<SentimentInputs>> {
        Ok(self.snapshot(symbol).await?.sentiment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use confluence_core::PriceLevel;

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileSnapshotProvider::new(dir.path());
        let err = provider.get_recent_trades("BTCUSDT").await.unwrap_err();
        assert!(format!("{err:#}").contains("BTCUSDT.json"));
    }

    #[tokio::test]
    async fn test_reads_parts_of_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let book = OrderBookSnapshot {
            bids: vec![PriceLevel::new(99.0, 1.0)],
            asks: vec![PriceLevel::new(101.0, 1.0)],
            timestamp: Utc::now(),
        };
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now()).with_orderbook(book.clone());
        std::fs::write(
            dir.path().join("BTCUSDT.json"),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        let provider = FileSnapshotProvider::new(dir.path());
        assert_eq!(provider.get_orderbook("BTCUSDT").await.unwrap(), book);
        assert!(provider.get_recent_trades("BTCUSDT").await.unwrap().is_empty());
        assert!(provider.get_sentiment("BTCUSDT").await.unwrap().is_none());
        assert!(provider.get_multi_timeframe_ohlcv("BTCUSDT").await.is_err());
    }
}
