//! Resting liquidity: bid/ask imbalance, depth near the mid, and walls.
//!
//! A wide spread means the book says less about the next move, so the
//! transform intensity falls as the spread widens.

use confluence_core::{
    Category, ComponentScore, DegradedComputation, MarketSnapshot, OrderBookSnapshot, PriceLevel,
    ScoringConfig, ValidationError,
};

use super::{finish, Indicator, SubScores};
use crate::regime::MarketContext;
use crate::transform::{clamp_intensity, TransformParams};

const IMBALANCE: TransformParams = TransformParams::symmetric(0.15, 0.4, 0.7);
const DEPTH_RATIO: TransformParams = TransformParams::symmetric(0.15, 0.4, 0.7);
const WALL_BIAS: TransformParams = TransformParams::symmetric(0.3, 0.6, 0.9);

/// Spread, in basis points, at which intensity is halved.
const SPREAD_HALVING_BPS: f64 = 25.0;

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// Floor (bid wall, support) or ceiling (ask wall, resistance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallSemantics {
    Floor,
    Ceiling,
}

impl From<Side> for WallSemantics {
    fn from(side: Side) -> Self {
        match side {
            Side::Bid => WallSemantics::Floor,
            Side::Ask => WallSemantics::Ceiling,
        }
    }
}

/// A single level much larger than its neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wall {
    pub side: Side,
    pub semantics: WallSemantics,
    pub price: f64,
    pub size: f64,
    /// Distance from mid-price in basis points
    pub distance_bps: f64,
}

/// Aggregate bias from detected walls.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WallBias {
    /// -1.0 (ceilings dominate) to +1.0 (floors dominate)
    pub bias: f64,
    pub floor_strength: f64,
    pub ceiling_strength: f64,
    pub floor_count: usize,
    pub ceiling_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OrderbookIndicator;

impl Indicator for OrderbookIndicator {
    fn category(&self) -> Category {
        Category::Orderbook
    }

    fn compute_with(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
        ctx: &MarketContext,
    ) -> Result<ComponentScore, ValidationError> {
        let settings = &config.indicators;
        let book = match &snapshot.orderbook {
            Some(book) if !book.bids.is_empty() && !book.asks.is_empty() => book,
            Some(_) => {
                let reason = DegradedComputation::MissingInput("one-sided order book".into());
                return Ok(finish(snapshot, Category::Orderbook, &SubScores::new(1.0), || reason));
            }
            None => {
                let reason = DegradedComputation::MissingInput("order book".into());
                return Ok(finish(snapshot, Category::Orderbook, &SubScores::new(1.0), || reason));
            }
        };
        let (Some(mid), Some(spread_bps)) = (book.mid_price(), book.spread_bps()) else {
            let reason = DegradedComputation::Numeric("order book has no mid price".into());
            return Ok(finish(snapshot, Category::Orderbook, &SubScores::new(1.0), || reason));
        };

        let spread_factor = 1.0 / (1.0 + spread_bps / SPREAD_HALVING_BPS);
        let mut subs = SubScores::new(clamp_intensity(ctx.intensity * spread_factor));

        let depth = settings.orderbook_depth;
        let bids = &book.bids[..depth.min(book.bids.len())];
        let asks = &book.asks[..depth.min(book.asks.len())];

        subs.push("top_imbalance", book.calculate_imbalance(depth), &IMBALANCE, 0.30)?;
        subs.push(
            "weighted_imbalance",
            weighted_imbalance(bids, asks, mid),
            &IMBALANCE,
            0.30,
        )?;
        if let Some(ratio) = depth_ratio(book, mid, settings.depth_band_bps) {
            subs.push("depth_ratio", ratio, &DEPTH_RATIO, 0.20)?;
        }

        let walls = detect_walls(bids, asks, mid, settings.wall_multiple, settings.depth_band_bps);
        let wall_bias = calculate_wall_bias(&walls);
        subs.push("wall_bias", wall_bias.bias, &WALL_BIAS, 0.20)?;

        let component = finish(snapshot, Category::Orderbook, &subs, || {
            DegradedComputation::Numeric("order book produced no sub-scores".into())
        });
        Ok(component
            .with_diagnostic("spread_bps", spread_bps)
            .with_diagnostic("floor_walls", wall_bias.floor_count as f64)
            .with_diagnostic("ceiling_walls", wall_bias.ceiling_count as f64))
    }
}

fn distance_bps(price: f64, mid: f64) -> f64 {
    ((price - mid) / mid).abs() * 10_000.0
}

/// Imbalance with each level weighted by `1 / (1 + distance_bps / 10)`, so
/// levels at the touch count most. Returns a value in [-1, 1].
#[must_use]
pub fn weighted_imbalance(bids: &[PriceLevel], asks: &[PriceLevel], mid: f64) -> f64 {
    if mid <= 0.0 {
        return 0.0;
    }
    let weigh = |levels: &[PriceLevel]| -> f64 {
        levels
            .iter()
            .map(|l| l.quantity / (1.0 + distance_bps(l.price, mid) / 10.0))
            .sum()
    };
    let weighted_bid = weigh(bids);
    let weighted_ask = weigh(asks);
    let total = weighted_bid + weighted_ask;
    if total < f64::EPSILON {
        return 0.0;
    }
    (weighted_bid - weighted_ask) / total
}

/// Bid versus ask quantity resting within `band_bps` of the mid.
fn depth_ratio(book: &OrderBookSnapshot, mid: f64, band_bps: f64) -> Option<f64> {
    let within = |levels: &[PriceLevel]| -> f64 {
        levels
            .iter()
            .filter(|l| distance_bps(l.price, mid) <= band_bps)
            .map(|l| l.quantity)
            .sum()
    };
    let bid = within(&book.bids);
    let ask = within(&book.asks);
    let total = bid + ask;
    (total > f64::EPSILON).then(|| (bid - ask) / total)
}

/// Levels at least `multiple` times the average level size and within
/// `proximity_bps` of the mid, largest first.
#[must_use]
pub fn detect_walls(
    bids: &[PriceLevel],
    asks: &[PriceLevel],
    mid: f64,
    multiple: f64,
    proximity_bps: f64,
) -> Vec<Wall> {
    let count = bids.len() + asks.len();
    if mid <= 0.0 || count == 0 {
        return Vec::new();
    }
    let average = bids.iter().chain(asks).map(|l| l.quantity).sum::<f64>() / count as f64;
    let min_size = average * multiple;
    if min_size <= 0.0 {
        return Vec::new();
    }

    let mut walls: Vec<Wall> = [(Side::Bid, bids), (Side::Ask, asks)]
        .into_iter()
        .flat_map(|(side, levels)| {
            levels.iter().filter_map(move |l| {
                let distance_bps = distance_bps(l.price, mid);
                (l.quantity >= min_size && distance_bps <= proximity_bps).then_some(Wall {
                    side,
                    semantics: side.into(),
                    price: l.price,
                    size: l.quantity,
                    distance_bps,
                })
            })
        })
        .collect();
    walls.sort_by(|a, b| b.size.total_cmp(&a.size));
    walls
}

/// Walls weighted by size and proximity (`1 / (1 + distance_bps / 100)`):
/// `(floor - ceiling) / (floor + ceiling)`.
#[must_use]
pub fn calculate_wall_bias(walls: &[Wall]) -> WallBias {
    let mut result = WallBias::default();
    for wall in walls {
        let weighted = wall.size / (1.0 + wall.distance_bps / 100.0);
        match wall.semantics {
            WallSemantics::Floor => {
                result.floor_strength += weighted;
                result.floor_count += 1;
            }
            WallSemantics::Ceiling => {
                result.ceiling_strength += weighted;
                result.ceiling_count += 1;
            }
        }
    }
    let total = result.floor_strength + result.ceiling_strength;
    if total > f64::EPSILON {
        result.bias = (result.floor_strength - result.ceiling_strength) / total;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::fixtures;
    use chrono::Utc;

    fn levels(levels: &[(f64, f64)]) -> Vec<PriceLevel> {
        levels.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect()
    }

    fn compute(book: OrderBookSnapshot) -> ComponentScore {
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now()).with_orderbook(book);
        OrderbookIndicator
            .compute(&snapshot, &ScoringConfig::default())
            .unwrap()
    }

    #[test]
    fn bid_heavy_book_is_bullish() {
        let score = compute(fixtures::book(
            &[(99.99, 30.0), (99.98, 30.0), (99.97, 30.0)],
            &[(100.01, 5.0), (100.02, 5.0), (100.03, 5.0)],
        ));
        assert!(!score.degraded);
        assert!(score.score > 75.0, "score {}", score.score);
    }

    #[test]
    fn ask_heavy_book_is_bearish() {
        let score = compute(fixtures::book(
            &[(99.99, 5.0), (99.98, 5.0), (99.97, 5.0)],
            &[(100.01, 30.0), (100.02, 30.0), (100.03, 30.0)],
        ));
        assert!(score.score < 25.0, "score {}", score.score);
    }

    #[test]
    fn wide_spread_pulls_towards_neutral() {
        let tight = compute(fixtures::book(&[(99.99, 30.0)], &[(100.01, 10.0)]));
        let wide = compute(fixtures::book(&[(99.0, 30.0)], &[(101.0, 10.0)]));
        assert!(tight.score > wide.score);
        assert!(wide.score > 50.0);
        assert!(wide.diagnostics["spread_bps"] > 100.0);
    }

    #[test]
    fn missing_or_one_sided_book_degrades() {
        let snapshot = MarketSnapshot::new("BTCUSDT", Utc::now());
        let missing = OrderbookIndicator
            .compute(&snapshot, &ScoringConfig::default())
            .unwrap();
        assert!(missing.degraded);

        let one_sided = compute(fixtures::book(&[(99.0, 1.0)], &[]));
        assert!(one_sided.degraded);
        assert!(one_sided.degraded_reason.unwrap().contains("one-sided"));
    }

    #[test]
    fn weighted_imbalance_gives_more_weight_to_near_levels() {
        let bids = levels(&[(100.0, 10.0), (95.0, 20.0)]);
        let asks = levels(&[(101.0, 15.0)]);
        let weighted = weighted_imbalance(&bids, &asks, 100.5);
        let basic = (30.0 - 15.0) / 45.0;
        assert!(weighted < basic - 0.1, "weighted={weighted}, basic={basic}");
    }

    #[test]
    fn weighted_imbalance_symmetric_book_returns_zero() {
        let bids = levels(&[(99.0, 10.0), (98.0, 10.0)]);
        let asks = levels(&[(101.0, 10.0), (102.0, 10.0)]);
        assert!(weighted_imbalance(&bids, &asks, 100.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_imbalance_one_sided_book() {
        let bids = levels(&[(100.0, 10.0)]);
        assert!((weighted_imbalance(&bids, &[], 100.0) - 1.0).abs() < f64::EPSILON);
        assert!((weighted_imbalance(&[], &bids, 100.0) + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn wall_detection_finds_large_levels_near_mid() {
        let bids = levels(&[(99.99, 1.0), (99.98, 40.0), (99.97, 1.0)]);
        let asks = levels(&[(100.01, 1.0), (100.02, 1.0), (100.03, 1.0)]);
        let walls = detect_walls(&bids, &asks, 100.0, 4.0, 50.0);
        assert_eq!(walls.len(), 1);
        assert_eq!(walls[0].side, Side::Bid);
        assert_eq!(walls[0].semantics, WallSemantics::Floor);
        assert!((walls[0].distance_bps - 2.0).abs() < 1e-6);
    }

    #[test]
    fn wall_detection_respects_proximity() {
        let bids = levels(&[(99.99, 1.0), (95.0, 40.0)]);
        let asks = levels(&[(100.01, 1.0)]);
        assert!(detect_walls(&bids, &asks, 100.0, 4.0, 50.0).is_empty());
    }

    #[test]
    fn wall_bias_weighs_floors_against_ceilings() {
        let floor = Wall {
            side: Side::Bid,
            semantics: WallSemantics::Floor,
            price: 99.9,
            size: 30.0,
            distance_bps: 10.0,
        };
        let ceiling = Wall {
            side: Side::Ask,
            semantics: WallSemantics::Ceiling,
            price: 100.1,
            size: 10.0,
            distance_bps: 10.0,
        };
        let bias = calculate_wall_bias(&[floor, ceiling]);
        assert!((bias.bias - 0.5).abs() < 1e-9);
        assert_eq!(bias.floor_count, 1);
        assert_eq!(bias.ceiling_count, 1);
        assert!(calculate_wall_bias(&[]).bias.abs() < f64::EPSILON);
    }
}
