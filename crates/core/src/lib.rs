pub mod config;
pub mod config_loader;
pub mod config_store;
pub mod config_watcher;
pub mod error;
pub mod market;
pub mod signal;
pub mod stats;
pub mod traits;

pub use config::{
    AppConfig, DatabaseConfig, DirectionalStop, DivergenceConfig, GovernorConfig,
    IndicatorSettings, PipelineConfig, RegimeSettings, ScoringConfig, SignalThresholds,
    StopLossConfig, StopMultipliers,
};
pub use config_loader::ConfigLoader;
pub use config_store::{ConfigStore, ConfigVersion, MultiplierMode};
pub use config_watcher::ConfigWatcher;
pub use error::{ConfigError, DegradedComputation, FatalPersistenceError, ValidationError};
pub use market::{
    Candle, MarketSnapshot, OrderBookSnapshot, PriceLevel, SentimentInputs, Timeframe,
    TradePrint, TradeSide,
};
pub use signal::{
    Category, CategoryBreakdown, ComponentScore, CompositeSignal, Direction, DivergenceBonus,
    DivergenceKind, TargetPrice, TradeParameters, NEUTRAL_SCORE,
};
pub use traits::{AlertSink, MarketDataProvider};
