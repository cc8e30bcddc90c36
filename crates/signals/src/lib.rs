//! Indicator scoring and confluence aggregation.
//!
//! Each [`indicator`] category maps a [`confluence_core::MarketSnapshot`] onto a
//! 0-100 score through the shared [`transform::score_deviation`] curve. The
//! [`ConfluenceAggregator`] fuses the categories into one
//! [`confluence_core::CompositeSignal`].

pub mod aggregator;
pub mod divergence;
pub mod indicator;
pub mod interpretation;
pub mod regime;
pub mod registry;
pub mod ta;
pub mod transform;

pub use aggregator::{direction_for, ConfluenceAggregator, ALL_CATEGORIES_FAILED};
pub use divergence::{detect_divergence, rolling_correlation};
pub use indicator::{
    combine_timeframes, Indicator, IndicatorKind, OrderbookIndicator, OrderflowIndicator,
    PriceStructureIndicator, SentimentIndicator, TechnicalIndicator, VolumeIndicator,
};
pub use regime::{MarketContext, MarketRegime};
pub use registry::{CategoryOutcome, IndicatorRegistry};
pub use transform::{score_deviation, Polarity, TransformParams};
