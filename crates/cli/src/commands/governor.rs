//! Kill-switch commands.

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};

use super::{print_json, Context};

/// Arguments for the governor command.
#[derive(Args, Debug, Clone)]
pub struct GovernorArgs {
    #[command(subcommand)]
    pub action: GovernorAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GovernorAction {
    /// Print mode, recent performance, thresholds and multipliers
    Status,
    /// Evaluate recent performance now and activate if it warrants
    Evaluate,
    /// Return to MONITORING. Multipliers stay as they are.
    Deactivate {
        /// Confirm the manual override
        #[arg(long)]
        force: bool,
    },
    /// Show recent mode transitions
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Runs a governor subcommand against the persisted kill-switch state.
///
/// # Errors
/// Returns an error if the store is unreachable or the requested transition
/// was refused.
pub async fn run_governor(context: &Context, args: GovernorArgs) -> Result<()> {
    let stores = context.stores().await?;
    let governor = context.governor(context.config_store()?, &stores);
    if !governor.restore().await {
        let status = governor.status();
        return Err(anyhow!(
            "could not restore kill-switch state: {}",
            status.last_error.unwrap_or_default()
        ));
    }

    match args.action {
        GovernorAction::Status => {
            let status = governor.refresh_status().await;
            print_json(&status)?;
        }
        GovernorAction::Evaluate => {
            let Some(evaluation) = governor.check().await else {
                let status = governor.status();
                bail!(
                    "evaluation failed: {}",
                    status
                        .last_error
                        .unwrap_or_else(|| "kill switch disabled".to_string())
                );
            };
            print_json(&evaluation)?;
            println!("Mode: {}", governor.mode().as_str());
        }
        GovernorAction::Deactivate { force } => {
            if !force {
                bail!("deactivation is a manual override; pass --force to confirm");
            }
            if governor.deactivate(true).await {
                println!("Kill switch deactivated. Stop multipliers were left unchanged.");
            } else if let Some(error) = governor.status().last_error {
                bail!("deactivation failed: {error}");
            } else {
                println!("Kill switch was not active.");
            }
        }
        GovernorAction::Audit { limit } => {
            let entries = stores.governor_state.audit_log(limit).await?;
            if entries.is_empty() {
                println!("No transitions recorded ({} store).", stores.backend);
            }
            for entry in entries {
                println!(
                    "{} {:>10} -> {:<10} by {:<8} {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.from_mode,
                    entry.to_mode,
                    entry.actor,
                    entry.reason
                );
            }
        }
    }

    Ok(())
}
