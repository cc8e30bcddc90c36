//! End-to-end confluence scoring over full snapshots.

use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use confluence_core::{
    Candle, Category, ComponentScore, ConfigVersion, Direction, MarketSnapshot, OrderBookSnapshot,
    PriceLevel, ScoringConfig, Timeframe, TradePrint, TradeSide, ValidationError,
};
use confluence_signals::{CategoryOutcome, ConfluenceAggregator, IndicatorRegistry};

// =============================================================================
// Helper Functions
// =============================================================================

fn candles(n: usize, step: f64) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let mut close = 100.0;
    (0..n)
        .map(|i| {
            let open = close;
            // alternate a small pullback so the series is not a straight line
            close *= if i % 4 == 3 { 1.0 - step / 2.0 } else { 1.0 + step };
            Candle {
                timestamp: start + Duration::minutes(i as i64),
                open,
                high: open.max(close) * 1.0008,
                low: open.min(close) * 0.9992,
                close,
                volume: 100.0 + (i % 5) as f64 * 10.0,
            }
        })
        .collect()
}

fn trending_snapshot(step: f64, buy_share: usize) -> MarketSnapshot {
    let series = candles(120, step);
    let last = series.last().unwrap().close;
    let mut snapshot = MarketSnapshot::new("ETHUSDT", Utc::now());
    for tf in [Timeframe::M1, Timeframe::M5, Timeframe::M30, Timeframe::H4] {
        snapshot = snapshot.with_candles(tf, series.clone());
    }

    let (heavy, light) = if step > 0.0 { (40.0, 8.0) } else { (8.0, 40.0) };
    let book = OrderBookSnapshot {
        bids: (1..=10)
            .map(|i| PriceLevel::new(last * (1.0 - 0.0002 * f64::from(i)), heavy))
            .collect(),
        asks: (1..=10)
            .map(|i| PriceLevel::new(last * (1.0 + 0.0002 * f64::from(i)), light))
            .collect(),
        timestamp: Utc::now(),
    };

    let trades = (0..100)
        .map(|i| TradePrint {
            timestamp: Utc::now() - Duration::seconds(100 - i),
            price: last,
            size: 1.0,
            side: if (i % 10) < buy_share as i64 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
        })
        .collect();

    snapshot.with_orderbook(book).with_trades(trades)
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn aligned_bullish_market_produces_buy() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let signal = ConfluenceAggregator::default()
        .analyze(&trending_snapshot(0.003, 8), &config)
        .unwrap();

    assert_eq!(signal.direction, Direction::Buy, "{}", signal.interpretation);
    assert!(signal.score > 60.0);
    assert!(!signal.degraded, "degraded: {:?}", signal.degraded_categories);
    assert!((signal.effective_weight_sum() - 1.0).abs() < 1e-9);
}

#[test]
fn aligned_bearish_market_produces_sell() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let signal = ConfluenceAggregator::default()
        .analyze(&trending_snapshot(-0.003, 2), &config)
        .unwrap();

    assert_eq!(signal.direction, Direction::Sell, "{}", signal.interpretation);
    assert!(signal.score < 40.0);
}

#[test]
fn orderflow_failure_degrades_but_still_scores() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let snapshot = trending_snapshot(0.003, 8);
    let mut outcomes: BTreeMap<Category, CategoryOutcome> =
        IndicatorRegistry::new().compute_all(&snapshot, &config.scoring);
    outcomes.insert(
        Category::Orderflow,
        Err(ValidationError::malformed("trade feed returned garbage")),
    );

    let signal = ConfluenceAggregator::aggregate("ETHUSDT", &outcomes, &config).unwrap();

    assert!(signal.degraded);
    assert_eq!(signal.degraded_categories, vec![Category::Orderflow]);
    assert!((signal.effective_weight_sum() - 1.0).abs() < 1e-9);
    assert!(signal.components[&Category::Orderflow].effective_weight.abs() < f64::EPSILON);
    assert!(signal.error.is_none());
    assert!((0.0..=100.0).contains(&signal.score));
}

#[test]
fn every_category_failing_yields_neutral() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let outcomes: BTreeMap<Category, CategoryOutcome> = Category::ALL
        .iter()
        .map(|c| (*c, Err(ValidationError::malformed("feed down"))))
        .collect();

    let signal = ConfluenceAggregator::aggregate("ETHUSDT", &outcomes, &config).unwrap();
    assert_eq!(signal.direction, Direction::Neutral);
    assert!((signal.score - 50.0).abs() < f64::EPSILON);
    assert!(signal.error.is_some());
}

#[test]
fn crossed_book_rejects_the_whole_snapshot() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let mut snapshot = trending_snapshot(0.003, 8);
    if let Some(book) = snapshot.orderbook.as_mut() {
        book.bids[0].price = book.asks[0].price * 1.01;
    }
    let signal = ConfluenceAggregator::default().analyze(&snapshot, &config).unwrap();
    assert_eq!(signal.error.as_deref(), Some(confluence_signals::ALL_CATEGORIES_FAILED));
}

#[test]
fn snapshot_round_trips_through_json_before_scoring() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let snapshot = trending_snapshot(0.003, 8);
    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: MarketSnapshot = serde_json::from_str(&json).unwrap();

    let direct = ConfluenceAggregator::default().analyze(&snapshot, &config).unwrap();
    let via_json = ConfluenceAggregator::default().analyze(&decoded, &config).unwrap();
    assert!((direct.score - via_json.score).abs() < 1e-9);
}

#[test]
fn hand_built_components_aggregate_deterministically() {
    let config = ConfigVersion::initial(ScoringConfig::default());
    let outcomes: BTreeMap<Category, CategoryOutcome> = Category::ALL
        .iter()
        .map(|c| (*c, Ok(ComponentScore::new(*c, 20.0))))
        .collect();
    let first = ConfluenceAggregator::aggregate("ETHUSDT", &outcomes, &config).unwrap();
    let second = ConfluenceAggregator::aggregate("ETHUSDT", &outcomes, &config).unwrap();
    assert_eq!(first.direction, Direction::Sell);
    assert!((first.score - second.score).abs() < f64::EPSILON);
    assert_eq!(first.components, second.components);
}
