//! Performance records: one row per emitted signal, opened once and closed once.

use chrono::{DateTime, Utc};
use confluence_core::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Realized outcome of a closed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

impl TradeOutcome {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Breakeven => "breakeven",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "win" => Some(Self::Win),
            "loss" => Some(Self::Loss),
            "breakeven" => Some(Self::Breakeven),
            _ => None,
        }
    }

    /// Classifies a realized P&L percentage.
    #[must_use]
    pub fn from_pnl(pnl_pct: Decimal) -> Self {
        if pnl_pct > Decimal::ZERO {
            Self::Win
        } else if pnl_pct < Decimal::ZERO {
            Self::Loss
        } else {
            Self::Breakeven
        }
    }
}

/// A signal's lifecycle row in `performance_records`.
///
/// Created on open with every close column null. The close columns are
/// written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PerformanceRecord {
    /// Unique signal identifier.
    pub signal_id: String,
    pub symbol: String,
    /// "BUY" or "SELL".
    pub direction: String,
    pub open_timestamp: DateTime<Utc>,
    pub entry_price: Decimal,
    pub close_timestamp: Option<DateTime<Utc>>,
    /// "win", "loss", "breakeven" or null while open.
    pub outcome: Option<String>,
    pub close_price: Option<Decimal>,
    /// Realized P&L in percent of entry, signed from the trade's perspective.
    pub pnl_pct: Option<Decimal>,
}

impl PerformanceRecord {
    /// Creates an open record.
    #[must_use]
    pub fn open(
        signal_id: impl Into<String>,
        symbol: impl Into<String>,
        direction: Direction,
        entry_price: Decimal,
        open_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            signal_id: signal_id.into(),
            symbol: symbol.into(),
            direction: direction.as_str().to_string(),
            open_timestamp,
            entry_price,
            close_timestamp: None,
            outcome: None,
            close_price: None,
            pnl_pct: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_timestamp.is_some()
    }

    #[must_use]
    pub fn direction(&self) -> Option<Direction> {
        Direction::parse(&self.direction)
    }

    #[must_use]
    pub fn outcome(&self) -> Option<TradeOutcome> {
        self.outcome.as_deref().and_then(TradeOutcome::parse)
    }

    /// Builds the close for an exit at `close_price`.
    ///
    /// Returns `None` if the entry price is zero or the direction is not BUY/SELL.
    #[must_use]
    pub fn settle(&self, close_price: Decimal, closed_at: DateTime<Utc>) -> Option<TradeClose> {
        let move_pct = (close_price - self.entry_price)
            .checked_div(self.entry_price)?
            .checked_mul(Decimal::ONE_HUNDRED)?;
        let pnl_pct = match self.direction()? {
            Direction::Buy => move_pct,
            Direction::Sell => -move_pct,
            Direction::Neutral => return None,
        };
        Some(TradeClose {
            outcome: TradeOutcome::from_pnl(pnl_pct),
            close_price,
            pnl_pct,
            closed_at,
        })
    }

    /// Applies a close. Returns false if the record was already closed.
    pub fn apply_close(&mut self, close: &TradeClose) -> bool {
        if self.is_closed() {
            return false;
        }
        self.close_timestamp = Some(close.closed_at);
        self.outcome = Some(close.outcome.as_str().to_string());
        self.close_price = Some(close.close_price);
        self.pnl_pct = Some(close.pnl_pct);
        true
    }
}

/// Close columns for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeClose {
    pub outcome: TradeOutcome,
    pub close_price: Decimal,
    pub pnl_pct: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Counts over closed records in a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub closed: u64,
    pub wins: u64,
    pub losses: u64,
    pub breakevens: u64,
}

impl OutcomeSummary {
    /// Tallies closed records. Open records are ignored.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a PerformanceRecord>) -> Self {
        let mut summary = Self::default();
        for record in records.into_iter().filter(|r| r.is_closed()) {
            summary.closed += 1;
            match record.outcome() {
                Some(TradeOutcome::Win) => summary.wins += 1,
                Some(TradeOutcome::Loss) => summary.losses += 1,
                Some(TradeOutcome::Breakeven) => summary.breakevens += 1,
                None => {}
            }
        }
        summary
    }

    /// `wins / closed`, or `None` with no closed records.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn win_rate(&self) -> Option<f64> {
        (self.closed > 0).then(|| self.wins as f64 / self.closed as f64)
    }
}
