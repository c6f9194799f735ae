use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use soundmirror_core::{
    load_config, Config, FfmpegEncoder, LibraryRunner, LoftyCodec, Outcome, OutcomeStatus,
    RunHandle, RunStatus, RunSummary, SqliteHistory,
};

/// Exit code for a run with failed units or a degraded history.
const EXIT_RUN_PROBLEMS: i32 = 1;

/// Exit code for configuration problems.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "soundmirror", version, about = "Mirror a FLAC library into a transcoded copy")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "soundmirror.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan, plan and execute a full mirror run.
    Run,
    /// Scan and plan only; print what a run would do.
    Plan,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(EXIT_CONFIG);
    }

    let result = match cli.command {
        Command::Run => run(config).await,
        Command::Plan => plan(config).await.map(|_| 0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {e:#}");
            std::process::exit(EXIT_RUN_PROBLEMS);
        }
    }
}

fn build_runner(config: Config) -> Result<LibraryRunner> {
    let history = SqliteHistory::new(&config.database.path)
        .with_context(|| format!("opening history database {:?}", config.database.path))?;
    let encoder = FfmpegEncoder::new(config.encoding.encoder.clone());
    Ok(LibraryRunner::new(
        config,
        Arc::new(encoder),
        Arc::new(LoftyCodec::new()),
        Arc::new(history),
    ))
}

async fn run(config: Config) -> Result<i32> {
    let runner = build_runner(config)?;
    let handle = RunHandle::new();

    // First Ctrl+C cancels gracefully; in-flight transcodes finish.
    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested; waiting for in-flight work");
            cancel_handle.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<Outcome>(256);
    let printer = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            print_outcome(&outcome);
        }
    });

    let summary = runner.run(&handle, tx).await?;
    let _ = printer.await;

    print_summary(&summary);
    if summary.has_failures() || summary.degraded {
        Ok(EXIT_RUN_PROBLEMS)
    } else {
        Ok(0)
    }
}

async fn plan(config: Config) -> Result<()> {
    let runner = build_runner(config)?;
    let plan = runner.build_plan().await?;

    for item in &plan.items {
        let what = item
            .source
            .as_ref()
            .map(|s| s.rel_path.as_str())
            .or(item.dest_rel_path.as_deref())
            .unwrap_or("?");
        println!("{:<10} {:<24} {}", item.action.label(), item.reason.label(), what);
    }
    info!(
        items = plan.items.len(),
        missing = plan.missing.len(),
        "plan complete"
    );
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    let what = outcome
        .dest_rel_path
        .as_deref()
        .or(outcome.source_rel_path.as_deref())
        .unwrap_or("?");
    match outcome.status {
        OutcomeStatus::Succeeded => info!("{} {}", outcome.action.label(), what),
        OutcomeStatus::Skipped | OutcomeStatus::Held => {
            info!("{} {} ({})", outcome.action.label(), what, outcome.reason)
        }
        OutcomeStatus::Failed => error!(
            "{} {} failed: {}",
            outcome.action.label(),
            what,
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn print_summary(summary: &RunSummary) {
    let status = match summary.status {
        RunStatus::Completed => "completed",
        RunStatus::Cancelled => "cancelled",
    };
    info!("run {status}");
    for (action, count) in &summary.succeeded {
        info!("  {action}: {count}");
    }
    for (action, count) in &summary.failed {
        warn!("  {action} failed: {count}");
    }
    if summary.not_dispatched > 0 {
        warn!("  not dispatched: {}", summary.not_dispatched);
    }
    if summary.degraded {
        warn!("  history is degraded; next run will reconcile");
    }
}
