//! Analyze command: one snapshot in, composite signal out.

use anyhow::Result;
use clap::Args;
use confluence_core::ConfigVersion;
use confluence_pipeline::load_snapshot;
use confluence_risk::StopLossCalculator;
use confluence_signals::ConfluenceAggregator;
use serde::Serialize;

use super::{print_json, Context};

/// Arguments for the analyze command.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Market snapshot JSON file
    #[arg(long)]
    pub snapshot: String,

    /// Entry price for trade parameters (defaults to the last close)
    #[arg(long)]
    pub entry: Option<f64>,
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    signal: &'a confluence_core::CompositeSignal,
    trade: Option<confluence_core::TradeParameters>,
}

/// Runs the analyze command.
///
/// # Errors
/// Returns an error if the snapshot cannot be read or fails validation.
pub async fn run_analyze(context: &Context, args: AnalyzeArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot).await?;
    let config = ConfigVersion::initial(context.config.scoring.clone());

    let signal = ConfluenceAggregator::default().analyze(&snapshot, &config)?;

    let trade = match args.entry.or_else(|| snapshot.last_price()) {
        Some(entry) if signal.is_actionable() => Some(
            StopLossCalculator::from_version(&config).trade_parameters(&signal, entry)?,
        ),
        _ => None,
    };

    print_json(&AnalyzeOutput {
        signal: &signal,
        trade,
    })
}
