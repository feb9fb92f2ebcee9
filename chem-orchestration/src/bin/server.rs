//! # Chem Orchestrator CLI / Server
//!
//! A `clap`-derived binary wrapping [`Engine`](chem_orchestration::orchestration::Engine),
//! mirroring the shape of `tasker-ctl`: a handful of subcommands backed by a
//! `tokio::main` entry point, tracing initialized before anything else runs.
//!
//! `serve` boots an engine from layered configuration and runs its
//! harvest/refill loop unattended (§4.5): a background poller calls
//! `update()` / `update_services()` on the configured interval until a
//! shutdown signal arrives. `submit-task` / `submit-service` are one-shot
//! demonstrations of the two scheduler entry points (§4.6) against a
//! freshly bootstrapped, in-memory engine — there is no cross-invocation
//! persistence here, since the durable store is an external collaborator
//! out of scope for this core (§1). `status` prints the resolved
//! configuration a `serve` invocation would run with.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tracing::{error, info, warn};

use chem_orchestration::orchestration::Engine;
use chem_shared::config::ChemConfig;
use chem_shared::logging;
use chem_shared::model::MoleculeRef;

#[derive(Debug, Parser)]
#[command(name = "chem-orchestrator", about = "Chem task-and-service orchestration engine")]
struct Args {
    /// Path to an optional TOML config file. Missing files are silently
    /// skipped (§6.1 `ChemConfig::load` layering).
    #[arg(long, global = true, env = "CHEM_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the harvest/refill loop unattended until a shutdown signal arrives.
    Serve,
    /// Submit one procedure request (§4.2/§4.6) and print the response envelope.
    SubmitTask {
        /// Registered procedure name ("single" or "optimization").
        procedure: String,
        /// The request's `meta` block, as a JSON object.
        #[arg(long)]
        meta: String,
        /// The request's `data` block, as a JSON array.
        #[arg(long)]
        data: String,
    },
    /// Submit one service request (§4.4/§4.6) and print the response envelope.
    SubmitService {
        /// The request's `meta` block, as a JSON object (must include `kind`).
        #[arg(long)]
        meta: String,
        /// Molecule references, as a JSON array of ids or inline geometries.
        #[arg(long)]
        molecules: String,
    },
    /// Print the configuration a `serve` invocation would run with.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let args = Args::parse();
    let config = ChemConfig::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::SubmitTask { procedure, meta, data } => submit_task(config, procedure, meta, data).await,
        Command::SubmitService { meta, molecules } => submit_service(config, meta, molecules).await,
        Command::Status => status(config),
    }
}

async fn serve(config: ChemConfig) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        queue_type = %config.adapter.queue_type,
        max_tasks = config.nanny.max_tasks,
        "starting chem-orchestrator"
    );

    let engine = Engine::bootstrap(config.clone())?;
    let nanny = engine.nanny.clone();

    let poll_interval = Duration::from_millis(config.nanny.poll_interval_ms.max(1));
    let poller = tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            if let Err(e) = nanny.update().await {
                error!(error = %e, "harvest/refill cycle failed");
            }
            if let Err(e) = nanny.update_services().await {
                error!(error = %e, "service iteration cycle failed");
            }
        }
    });

    info!("chem-orchestrator ready, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, stopping poller");
    poller.abort();

    Ok(())
}

async fn submit_task(
    config: ChemConfig,
    procedure: String,
    meta: String,
    data: String,
) -> anyhow::Result<()> {
    let engine = Engine::bootstrap(config)?;
    let meta: Value = serde_json::from_str(&meta)?;
    let data: Value = serde_json::from_str(&data)?;
    let response = engine.queue_scheduler.submit(&procedure, meta, data).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn submit_service(
    config: ChemConfig,
    meta: String,
    molecules: String,
) -> anyhow::Result<()> {
    let engine = Engine::bootstrap(config)?;
    let meta: Value = serde_json::from_str(&meta)?;
    let molecules: Vec<MoleculeRef> = serde_json::from_str(&molecules)?;
    let response = engine.service_scheduler.submit(meta, molecules).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn status(config: ChemConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
