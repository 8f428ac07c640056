//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use iamsync::LoaderKind;

/// iamsync - identity lifecycle reconciliation
#[derive(Parser, Debug)]
#[command(name = "iamsync")]
#[command(version)]
#[command(about = "Provision, move and deprovision directory identities idempotently")]
#[command(
    long_about = "iamsync reads joiner, mover, leaver or lifecycle-status CSV sheets and \
                  converges each identity's group, policy, credentials and tags onto the \
                  declared state."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every identity in the input against the directory
    Apply {
        #[command(flatten)]
        run: RunArgs,

        /// Write the final directory state back to the snapshot file
        #[arg(long, default_value_t = false)]
        write_back: bool,

        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the commands a run would issue, without changing anything
    Plan {
        #[command(flatten)]
        run: RunArgs,

        /// Print the plan as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Inputs shared by `apply` and `plan`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Desired-state CSV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Sheet kind, used when rows carry no explicit action
    #[arg(short, long, value_enum)]
    pub kind: LoaderKind,

    /// Directory snapshot (JSON)
    #[arg(short, long)]
    pub directory: PathBuf,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Identities reconciled in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,
}
