//! # iamsync - identity lifecycle reconciliation
//!
//! Entry point for the `iamsync` command.
//!
//! ## Run Sequence
//!
//! 1. **Configuration** - defaults, config file, `IAMSYNC_*` environment, flags
//! 2. **Desired State** - load the CSV sheet into records
//! 3. **Directory** - load the JSON snapshot behind the retry decorator
//! 4. **Controller** - fetch the account scope and reconcile (or plan) the batch
//! 5. **Report** - print the summary, optionally write the directory back
//!
//! ## Shutdown
//!
//! Ctrl+C stops dispatching new identities; identities already running finish
//! and the rest are reported as cancelled.
//!
//! ## Exit Status
//!
//! `0` when no identity failed or was left degraded, `2` otherwise.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use iamsync::{LoadedBatch, SyncConfig, loader, snapshot};
use iamsync_directory::{DirectoryClient, InMemoryDirectory, RetryingDirectory};
use iamsync_reconciler::{CancelHandle, LifecycleController, cancellation};

use crate::cli::{Cli, Commands, RunArgs};

/// Exit status when any identity failed or was left degraded.
const EXIT_PROBLEMS: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            run,
            write_back,
            json,
        } => apply(&run, write_back, json).await,
        Commands::Plan { run, json } => plan(&run, json).await,
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so JSON output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Everything a run needs, loaded from disk.
struct Session {
    batch: LoadedBatch,
    directory: Arc<InMemoryDirectory>,
    controller: LifecycleController,
}

async fn open_session(args: &RunArgs) -> Result<Session> {
    let config = load_config(args)?;

    let batch = loader::load_file(&args.input, args.kind).with_context(|| {
        format!("Failed to load desired state from {}", args.input.display())
    })?;

    let state = snapshot::load(&args.directory).with_context(|| {
        format!("Failed to load directory snapshot {}", args.directory.display())
    })?;
    let directory = Arc::new(InMemoryDirectory::new(state));
    let client: Arc<dyn DirectoryClient> = Arc::new(RetryingDirectory::new(
        Arc::clone(&directory),
        config.retry.clone(),
    ));

    let controller = LifecycleController::connect(client, config.controller_config())
        .await
        .context("Failed to start the lifecycle controller")?;

    Ok(Session {
        batch,
        directory,
        controller,
    })
}

fn load_config(args: &RunArgs) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(args.config.as_deref()).with_context(|| {
        args.config.as_ref().map_or_else(
            || "Failed to load configuration".to_string(),
            |path| format!("Failed to load configuration from {}", path.display()),
        )
    })?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn apply(args: &RunArgs, write_back: bool, json: bool) -> Result<ExitCode> {
    let Session {
        batch,
        directory,
        controller,
    } = open_session(args).await?;

    let (handle, signal) = cancellation();
    let watcher = tokio::spawn(cancel_on_ctrl_c(handle));
    let mut report = controller.run_until(batch.records.clone(), signal).await;
    watcher.abort();
    report.absorb_rejected(batch.rejected_entries());

    if write_back {
        snapshot::save(&args.directory, &directory.snapshot().await).with_context(|| {
            format!("Failed to write directory snapshot {}", args.directory.display())
        })?;
        info!(path = %args.directory.display(), "Directory snapshot updated");
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print!("{report}");
    }

    if report.has_problems() {
        warn!(
            degraded = report.totals.degraded,
            failed = report.totals.failed,
            "Run finished with identities needing attention"
        );
        return Ok(ExitCode::from(EXIT_PROBLEMS));
    }
    Ok(ExitCode::SUCCESS)
}

async fn plan(args: &RunArgs, json: bool) -> Result<ExitCode> {
    let Session {
        batch, controller, ..
    } = open_session(args).await?;

    let entries = controller.plan(&batch.records).await;

    if json {
        let output = serde_json::json!({
            "entries": entries,
            "rejected": batch.rejected,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize plan")?
        );
    } else {
        for entry in &entries {
            print!("{entry}");
        }
        for row in &batch.rejected {
            println!("line {}: skipped, {}", row.line, row.reason);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Cancel the run on Ctrl+C.
async fn cancel_on_ctrl_c(handle: CancelHandle) {
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("Received Ctrl+C, finishing in-flight identities");
            handle.cancel();
        }
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
