//! chainmig runs smart contract migrations in dependency order, exactly once per network.

mod cli;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use chainmig_deploy::{Migrator, RunReport};
use cli::{Cli, Command, OutputFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut migrator = Migrator::load(&cli.config)?;
    if let Some(ledger) = &cli.ledger {
        migrator = migrator.with_ledger_path(ledger);
    }

    match cli.command {
        Command::Migrate {
            network,
            build_dir,
            dry_run,
            format,
        } => {
            if let Some(build_dir) = build_dir {
                migrator = migrator.with_build_dir(build_dir);
            }

            let report = if dry_run {
                migrator.rehearse(&network).await?
            } else {
                migrator.migrate(&network, cancel_on_ctrl_c()).await?
            };

            print_report(&report, format)?;
            check_report(&report)
        }
        Command::Plan => {
            let plan = migrator.plan()?;
            for (position, step) in plan.steps().iter().enumerate() {
                match &step.method {
                    Some(method) => println!(
                        "{:>3}. {} ({} {}.{})",
                        position + 1,
                        step.id,
                        step.kind,
                        step.contract,
                        method
                    ),
                    None => println!(
                        "{:>3}. {} ({} {})",
                        position + 1,
                        step.id,
                        step.kind,
                        step.contract
                    ),
                }
            }
            Ok(())
        }
        Command::Status { network } => {
            println!("{}", migrator.status(&network).await?);
            Ok(())
        }
        Command::Export { network, out } => {
            let file = migrator.export(&network, &out).await?;
            tracing::info!(
                out = %out.display(),
                networks = file.networks.len(),
                "Export complete"
            );
            Ok(())
        }
    }
}

/// Flip the returned flag on the first Ctrl-C. The step in flight finishes first.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step...");
            let _ = cancel_tx.send(true);
        }
    });

    cancel_rx
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", report.render()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

/// Turn an unsuccessful run into an error, so the process exits non-zero.
fn check_report(report: &RunReport) -> Result<()> {
    if let Some((step, reason)) = &report.first_failure {
        anyhow::bail!("Migration failed at step `{step}`: {reason}");
    }
    if report.cancelled {
        anyhow::bail!("Migration cancelled before completion");
    }

    tracing::info!(
        network_id = report.network_id,
        steps = report.steps.len(),
        "Migration complete"
    );
    Ok(())
}
