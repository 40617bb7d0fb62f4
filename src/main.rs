//! Conclave CLI - orchestrator console and worker entry point

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{info, warn};

use conclave::{logging, oracle, run_console, Config, OracleKind, Orchestrator, WorkerKind, WorkerServer};

#[derive(Parser)]
#[command(name = "conclave")]
#[command(about = "Two-tier agent dispatch over worker processes", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reasoning oracle to use
    #[arg(long, global = true, value_enum)]
    oracle: Option<OracleKind>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and read requests from stdin (default)
    Run,

    /// Serve a worker over stdin/stdout
    Worker {
        #[arg(value_enum)]
        kind: WorkerKind,
    },
}

/// How the orchestrator console ended
enum Exit {
    Finished,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(Exit::Finished) => ExitCode::SUCCESS,
        // A blocked stdin read would hold up runtime teardown
        Ok(Exit::Interrupted) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Exit> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(kind) = args.oracle {
        config.oracle.kind = kind;
    }
    logging::init(config.log_filter.as_deref());

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => orchestrate(config, forwarded_args(&args.config, args.oracle)).await,
        Commands::Worker { kind } => {
            serve_worker(kind, config).await?;
            Ok(Exit::Finished)
        }
    }
}

/// Flags the default workers inherit from the orchestrator's command line
fn forwarded_args(config: &Option<PathBuf>, oracle: Option<OracleKind>) -> Vec<String> {
    let mut forwarded = Vec::new();
    if let Some(path) = config {
        forwarded.push("--config".to_string());
        forwarded.push(path.to_string_lossy().into_owned());
    }
    if let Some(kind) = oracle {
        let name = match kind {
            OracleKind::OpenAi => "openai",
            OracleKind::Heuristic => "heuristic",
        };
        forwarded.push("--oracle".to_string());
        forwarded.push(name.to_string());
    }
    forwarded
}

async fn orchestrate(config: Config, forwarded: Vec<String>) -> anyhow::Result<Exit> {
    let executable = std::env::current_exe().context("Failed to locate the conclave executable")?;
    let config = config.with_default_servers(&executable, &forwarded);
    config.validate()?;

    let oracle = oracle::build(&config.oracle)?;
    let mut orchestrator = Orchestrator::start(&config, oracle).await?;
    let terminated = terminated();
    println!("Tools available: {}", orchestrator.tool_names().join(", "));
    println!("Enter a request, or 'quit' to exit.");

    let input = BufReader::new(tokio::io::stdin());
    let (result, exit) = tokio::select! {
        result = run_console(&orchestrator, input, tokio::io::stdout()) => (result, Exit::Finished),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            (Ok(()), Exit::Interrupted)
        }
        _ = terminated => {
            info!("Terminated");
            (Ok(()), Exit::Interrupted)
        }
    };

    let report = orchestrator.shutdown().await;
    info!(graceful = report.graceful, killed = report.killed, "Session ended");
    result?;
    Ok(exit)
}

/// Resolves when the process receives SIGTERM; the handler is installed on call
#[cfg(unix)]
fn terminated() -> impl Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate());
    async move {
        match sigterm {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
fn terminated() -> impl Future<Output = ()> {
    std::future::pending()
}

async fn serve_worker(kind: WorkerKind, config: Config) -> anyhow::Result<()> {
    config.validate_agent()?;
    let oracle = oracle::build(&config.oracle)?;
    let server = WorkerServer::new(kind, oracle, &config);
    server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .with_context(|| format!("{kind} worker transport failed"))?;
    Ok(())
}
