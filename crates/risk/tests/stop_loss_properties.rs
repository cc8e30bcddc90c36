//! Property tests for confidence-scaled stops.

use confluence_core::{Direction, StopLossConfig};
use confluence_risk::StopLossCalculator;
use proptest::prelude::*;

fn calculator() -> StopLossCalculator {
    StopLossCalculator::new(StopLossConfig::default())
}

fn directional() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Buy), Just(Direction::Sell)]
}

proptest! {
    #[test]
    fn stop_stays_between_min_and_max_stop(direction in directional(), score in 0.0f64..=100.0) {
        let calc = calculator();
        let settings = calc.config().for_direction(direction).unwrap();
        let pct = calc.stop_loss_percentage(direction, score).unwrap();
        prop_assert!(pct >= settings.min_stop() - 1e-9);
        prop_assert!(pct <= settings.max_stop() + 1e-9);
    }

    #[test]
    fn buy_stop_never_widens_as_score_rises(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let calc = calculator();
        let at_lo = calc.stop_loss_percentage(Direction::Buy, lo).unwrap();
        let at_hi = calc.stop_loss_percentage(Direction::Buy, hi).unwrap();
        prop_assert!(at_hi <= at_lo + 1e-12);
    }

    #[test]
    fn sell_stop_never_widens_as_score_falls(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let calc = calculator();
        let at_lo = calc.stop_loss_percentage(Direction::Sell, lo).unwrap();
        let at_hi = calc.stop_loss_percentage(Direction::Sell, hi).unwrap();
        prop_assert!(at_lo <= at_hi + 1e-12);
    }

    #[test]
    fn stop_price_round_trips_to_percentage(
        direction in directional(),
        score in 0.0f64..=100.0,
        entry in 0.0001f64..1_000_000.0,
    ) {
        let calc = calculator();
        let pct = calc.stop_loss_percentage(direction, score).unwrap();
        let price = calc.stop_loss_price(entry, direction, score).unwrap();
        let implied = ((price - entry) / entry).abs() * 100.0;
        prop_assert!((implied - pct).abs() < 1e-6);
        match direction {
            Direction::Buy => prop_assert!(price < entry),
            _ => prop_assert!(price > entry),
        }
    }
}

#[test]
fn threshold_boundary_is_the_widest_stop() {
    let calc = calculator();
    let at = calc.stop_loss_percentage(Direction::Buy, 70.0).unwrap();
    let just_past = calc.stop_loss_percentage(Direction::Buy, 70.001).unwrap();
    assert!((at - 4.5).abs() < 1e-9);
    assert!(just_past < at);

    let at_sell = calc.stop_loss_percentage(Direction::Sell, 30.0).unwrap();
    let just_past_sell = calc.stop_loss_percentage(Direction::Sell, 29.999).unwrap();
    assert!(just_past_sell < at_sell);
}
