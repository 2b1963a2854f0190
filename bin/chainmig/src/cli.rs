use std::path::PathBuf;

use chainmig_deploy::MIGRATIONS_FILENAME;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How run reports are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "chainmig")]
#[command(
    author,
    version,
    about = "Deterministic, idempotent smart contract migrations"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "CHAINMIG_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the migration file, or to a directory containing `Migrations.toml`.
    #[arg(short, long, global = true, env = "CHAINMIG_CONFIG", default_value = MIGRATIONS_FILENAME)]
    pub config: PathBuf,

    /// Path to the ledger file.
    ///
    /// Defaults to `.chainmig/ledger.jsonl` next to the migration file.
    #[arg(long, global = true, env = "CHAINMIG_LEDGER")]
    pub ledger: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every pending step against a network.
    Migrate {
        /// The network profile to migrate.
        #[arg(short, long, env = "CHAINMIG_NETWORK")]
        network: String,

        /// Directory holding the compiled contract artifacts.
        #[arg(long, env = "CHAINMIG_BUILD_DIR")]
        build_dir: Option<PathBuf>,

        /// Rehearse the run against an in-process network. Nothing is
        /// submitted and the ledger is left untouched.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Report format.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Print the steps in execution order.
    Plan,

    /// Show the recorded state of every step on a network.
    Status {
        #[arg(short, long, env = "CHAINMIG_NETWORK")]
        network: String,
    },

    /// Write recorded deployments to a JSON file.
    Export {
        #[arg(short, long, env = "CHAINMIG_NETWORK")]
        network: String,

        /// Output file. Existing sections for other networks are kept.
        #[arg(short, long, default_value = "deployments.json")]
        out: PathBuf,
    },
}
