//! Market data snapshot types.
//!
//! A [`MarketSnapshot`] is assembled once per monitoring cycle and handed
//! read-only to every indicator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All supported timeframes, shortest first.
    pub const ALL: [Timeframe; 7] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
    ];

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
    }

    /// Interval length in minutes.
    #[must_use]
    pub fn minutes(&self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Typical price: (high + low + close) / 3.
    #[must_use]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// +1.0 for an up candle, -1.0 for a down candle, 0.0 for a doji.
    #[must_use]
    pub fn body_sign(&self) -> f64 {
        if self.close > self.open {
            1.0
        } else if self.close < self.open {
            -1.0
        } else {
            0.0
        }
    }

    fn validate(&self, tf: Timeframe, idx: usize) -> Result<(), ValidationError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ValidationError::non_finite(format!("ohlcv[{tf}][{idx}].{name}")));
            }
        }
        if self.high < self.low {
            return Err(ValidationError::malformed(format!(
                "ohlcv[{tf}][{idx}]: high {} below low {}",
                self.high, self.low
            )));
        }
        if self.low <= 0.0 {
            return Err(ValidationError::malformed(format!(
                "ohlcv[{tf}][{idx}]: non-positive price"
            )));
        }
        if self.volume < 0.0 {
            return Err(ValidationError::malformed(format!(
                "ohlcv[{tf}][{idx}]: negative volume"
            )));
        }
        Ok(())
    }
}

/// Order book price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price at this level
    pub price: f64,
    /// Quantity at this level
    pub quantity: f64,
}

impl PriceLevel {
    #[must_use]
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Snapshot of an order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Bid levels (highest price first)
    pub bids: Vec<PriceLevel>,
    /// Ask levels (lowest price first)
    pub asks: Vec<PriceLevel>,
    /// Timestamp of snapshot
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Calculates order book imbalance over the top `depth` levels:
    /// (bid_vol - ask_vol) / (bid_vol + ask_vol).
    ///
    /// Returns value in [-1.0, 1.0] where positive means more bid volume.
    #[must_use]
    pub fn calculate_imbalance(&self, depth: usize) -> f64 {
        let bid_vol: f64 = self.bids.iter().take(depth).map(|l| l.quantity).sum();
        let ask_vol: f64 = self.asks.iter().take(depth).map(|l| l.quantity).sum();
        let total = bid_vol + ask_vol;

        if total <= f64::EPSILON {
            return 0.0;
        }

        (bid_vol - ask_vol) / total
    }

    /// Returns the best bid price (highest bid).
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Returns the best ask price (lowest ask).
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Calculates the mid price.
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Spread in basis points of the mid price.
    #[must_use]
    pub fn spread_bps(&self) -> Option<f64> {
        let mid = self.mid_price()?;
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for (side, levels) in [("bids", &self.bids), ("asks", &self.asks)] {
            for (i, level) in levels.iter().enumerate() {
                if !level.price.is_finite() || !level.quantity.is_finite() {
                    return Err(ValidationError::non_finite(format!("orderbook.{side}[{i}]")));
                }
                if level.price <= 0.0 || level.quantity < 0.0 {
                    return Err(ValidationError::malformed(format!(
                        "orderbook.{side}[{i}]: price {} quantity {}",
                        level.price, level.quantity
                    )));
                }
            }
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid > ask {
                return Err(ValidationError::malformed(format!(
                    "orderbook crossed: best bid {bid} above best ask {ask}"
                )));
            }
        }
        Ok(())
    }
}

/// Aggressor side of a trade print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buyer lifted the ask
    Buy,
    /// Seller hit the bid
    Sell,
}

impl TradeSide {
    /// +1.0 for buys, -1.0 for sells.
    #[must_use]
    pub fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

/// One executed trade from the tape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
}

impl TradePrint {
    /// Signed size: positive for buys, negative for sells.
    #[must_use]
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }
}

/// Derivatives positioning data used by the sentiment indicator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentInputs {
    /// Latest funding rate (per funding interval)
    pub funding_rate: Option<f64>,
    /// Historical funding rates, oldest first
    #[serde(default)]
    pub funding_history: Vec<f64>,
    /// Accounts long / accounts short
    pub long_short_ratio: Option<f64>,
    /// Open interest observations, oldest first
    #[serde(default)]
    pub open_interest: Vec<f64>,
}

impl SentimentInputs {
    /// True if no field carries data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funding_rate.is_none()
            && self.long_short_ratio.is_none()
            && self.open_interest.is_empty()
    }
}

/// Everything the indicators see for one instrument in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Candle series per timeframe, oldest first
    #[serde(default)]
    pub ohlcv: BTreeMap<Timeframe, Vec<Candle>>,
    pub orderbook: Option<OrderBookSnapshot>,
    /// Recent trades, oldest first
    #[serde(default)]
    pub trades: Vec<TradePrint>,
    pub sentiment: Option<SentimentInputs>,
}

impl MarketSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            ohlcv: BTreeMap::new(),
            orderbook: None,
            trades: Vec::new(),
            sentiment: None,
        }
    }

    /// Sets the candle series for a timeframe.
    #[must_use]
    pub fn with_candles(mut self, tf: Timeframe, candles: Vec<Candle>) -> Self {
        self.ohlcv.insert(tf, candles);
        self
    }

    /// Sets the order book.
    #[must_use]
    pub fn with_orderbook(mut self, orderbook: OrderBookSnapshot) -> Self {
        self.orderbook = Some(orderbook);
        self
    }

    /// Sets the trade tape.
    #[must_use]
    pub fn with_trades(mut self, trades: Vec<TradePrint>) -> Self {
        self.trades = trades;
        self
    }

    /// Sets the sentiment inputs.
    #[must_use]
    pub fn with_sentiment(mut self, sentiment: SentimentInputs) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    /// Returns the candles for a timeframe, if present.
    #[must_use]
    pub fn candles(&self, tf: Timeframe) -> Option<&[Candle]> {
        self.ohlcv.get(&tf).map(Vec::as_slice)
    }

    /// Returns the most recent close across the shortest available timeframe.
    #[must_use]
    pub fn last_price(&self) -> Option<f64> {
        self.ohlcv
            .values()
            .find_map(|series| series.last().map(|c| c.close))
            .or_else(|| self.orderbook.as_ref().and_then(OrderBookSnapshot::mid_price))
            .or_else(|| self.trades.last().map(|t| t.price))
    }

    /// Structural validation.
    ///
    /// Insufficient history is not an error here; indicators degrade on their
    /// own. This rejects only inputs no indicator could interpret.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for empty symbols, non-finite numbers,
    /// inverted candles, negative volumes/quantities, or a crossed book.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::malformed("snapshot symbol is empty"));
        }
        for (tf, series) in &self.ohlcv {
            for (i, candle) in series.iter().enumerate() {
                candle.validate(*tf, i)?;
            }
            if series.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
                return Err(ValidationError::malformed(format!(
                    "ohlcv[{tf}] is not in chronological order"
                )));
            }
        }
        if let Some(book) = &self.orderbook {
            book.validate()?;
        }
        for (i, trade) in self.trades.iter().enumerate() {
            if !trade.price.is_finite() || !trade.size.is_finite() {
                return Err(ValidationError::non_finite(format!("trades[{i}]")));
            }
            if trade.price <= 0.0 || trade.size < 0.0 {
                return Err(ValidationError::malformed(format!(
                    "trades[{i}]: price {} size {}",
                    trade.price, trade.size
                )));
            }
        }
        if let Some(sentiment) = &self.sentiment {
            let scalars = [
                ("sentiment.funding_rate", sentiment.funding_rate),
                ("sentiment.long_short_ratio", sentiment.long_short_ratio),
            ];
            for (name, value) in scalars {
                if value.is_some_and(|v| !v.is_finite()) {
                    return Err(ValidationError::non_finite(name));
                }
            }
            if sentiment
                .funding_history
                .iter()
                .chain(sentiment.open_interest.iter())
                .any(|v| !v.is_finite())
            {
                return Err(ValidationError::non_finite("sentiment history"));
            }
        }
        Ok(())
    }
}
