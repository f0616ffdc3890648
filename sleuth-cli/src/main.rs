//! Sleuth CLI: interactive deep-research session in the terminal.
//!
//! Clarifies the request over stdin, researches it with web search, and
//! prints a report.

mod repl;
mod setup;

use clap::Parser;
use sleuth_core::research::{ResearchSession, SessionOutcome, SessionSettings};
use sleuth_core::{PromptLibrary, SleuthConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sleuth: ask a question, get a researched report
#[derive(Parser, Debug)]
#[command(name = "sleuth", version, about, long_about = None)]
struct Cli {
    /// LLM model for the research loop, brief and report
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory (reads .sleuth/config.toml from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Sleuth failed");
            eprintln!("\x1b[31mError: {e:#}\x1b[0m");
            ExitCode::FAILURE
        }
    }
}

/// Human-readable stderr layer plus a daily JSON log file.
fn init_logging(verbose: u8, quiet: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "sleuth", "sleuth")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sleuth.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("sleuth_core=debug,sleuth_tools=debug,sleuth=debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

fn load_config(cli: &Cli, workspace: &std::path::Path) -> anyhow::Result<SleuthConfig> {
    let mut config = match &cli.config {
        Some(path) => sleuth_core::config::load_config_file(path),
        None => sleuth_core::config::load_config(Some(workspace), None),
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;

    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config = load_config(&cli, &workspace)?;

    let capabilities = setup::build_capabilities(&config)?;
    let prompts = Arc::new(PromptLibrary::new()?);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if !cli.quiet {
        repl::print_banner(&config);
    }

    let mut session = ResearchSession::new(
        capabilities,
        prompts,
        SessionSettings::from(&config),
        Arc::new(repl::CliCallback),
        cancel.clone(),
    );
    info!(session = %session.id(), model = %config.llm.model, "Session started");

    let mut input = repl::StdinInput::spawn();
    match session.run(&mut input).await {
        Ok(SessionOutcome::Report(report)) => {
            repl::print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Ok(SessionOutcome::InputClosed) => {
            println!("\nGoodbye!");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            warn!(session = %session.id(), phase = %session.phase(), "Session cancelled");
            eprintln!("\n\x1b[33mCancelled.\x1b[0m");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(session = %session.id(), phase = %session.phase(), error = %e, "Session failed");
            Err(e.into())
        }
    }
}

/// Cancel the session on Ctrl-C or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Interrupt received, cancelling");
        cancel.cancel();
    });
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not listen for SIGTERM");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}
