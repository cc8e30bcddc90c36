//! Stop-loss command.

use anyhow::Result;
use clap::Args;
use confluence_core::{ConfigVersion, Direction};
use confluence_risk::StopLossCalculator;

use super::Context;

/// Arguments for the stop-loss command.
#[derive(Args, Debug, Clone)]
pub struct StopLossArgs {
    /// BUY or SELL (LONG and SHORT are accepted)
    #[arg(long, value_parser = parse_direction)]
    pub direction: Direction,

    /// Composite score in [0, 100]
    #[arg(long)]
    pub score: f64,

    /// Entry price
    #[arg(long)]
    pub entry: f64,
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    Direction::parse(raw).ok_or_else(|| format!("unknown direction '{raw}'"))
}

/// Runs the stop-loss command.
///
/// # Errors
/// Returns an error for a NEUTRAL direction, an out-of-range score, or a
/// non-positive entry.
pub fn run_stop_loss(context: &Context, args: &StopLossArgs) -> Result<()> {
    let config = ConfigVersion::initial(context.config.scoring.clone());
    let calculator = StopLossCalculator::from_version(&config);

    let decision = calculator.evaluate(args.direction, args.score)?;
    let price = calculator.stop_loss_price(args.entry, args.direction, args.score)?;

    println!("Direction:   {}", args.direction);
    println!("Score:       {:.2}", args.score);
    println!("Confidence:  {:.3}", decision.confidence);
    println!("Stop loss:   {:.3}%", decision.pct);
    println!("Entry:       {:.4}", args.entry);
    println!("Stop price:  {price:.4}");
    if decision.out_of_range {
        println!(
            "Note: clamped from {:.3}% to the sanity range",
            decision.unbounded_pct
        );
    }
    Ok(())
}
