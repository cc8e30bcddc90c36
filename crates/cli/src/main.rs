use clap::{Parser, Subcommand};

mod commands;

use commands::{AnalyzeArgs, GovernorArgs, MonitorArgs, StopLossArgs};

#[derive(Parser)]
#[command(name = "confluence")]
#[command(about = "Confluence signal engine with a performance kill switch", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(
        short,
        long,
        global = true,
        default_value = confluence_core::config_loader::DEFAULT_CONFIG_PATH
    )]
    config: String,

    /// Database connection URL. Without it an in-memory store is used.
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a market snapshot and print the composite signal
    Analyze(AnalyzeArgs),
    /// Compute the stop loss for a direction and score
    StopLoss(StopLossArgs),
    /// Run the monitoring pipeline and the kill switch until Ctrl+C
    Monitor(MonitorArgs),
    /// Inspect or operate the kill switch
    Governor(GovernorArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let context = commands::Context::new(&cli.config, cli.database_url)?;

    match cli.command {
        Commands::Analyze(args) => commands::run_analyze(&context, args).await?,
        Commands::StopLoss(args) => commands::run_stop_loss(&context, &args)?,
        Commands::Monitor(args) => commands::run_monitor(&context, args).await?,
        Commands::Governor(args) => commands::run_governor(&context, args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use commands::governor::GovernorAction;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_governor_deactivate_parses_force() {
        let cli = Cli::try_parse_from(["confluence", "governor", "deactivate", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Governor(GovernorArgs {
                action: GovernorAction::Deactivate { force: true }
            })
        ));
        assert_eq!(cli.config, "config/Config.toml");
    }

    #[test]
    fn test_monitor_splits_symbols() {
        let cli = Cli::try_parse_from([
            "confluence",
            "monitor",
            "--snapshots-dir",
            "snapshots",
            "--symbols",
            "BTCUSDT,SOLUSDT",
        ])
        .unwrap();
        let Commands::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert_eq!(args.symbols, vec!["BTCUSDT", "SOLUSDT"]);
        assert_eq!(args.interval_secs, None);
    }

    #[test]
    fn test_stop_loss_rejects_unknown_direction() {
        assert!(Cli::try_parse_from([
            "confluence",
            "stop-loss",
            "--direction",
            "sideways",
            "--score",
            "80",
            "--entry",
            "100",
        ])
        .is_err());
    }
}
