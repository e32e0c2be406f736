//! `dialer` — command-line control surface for the outbound dialer
//! engine: `run`/`stop`/`status`/`dial`.

mod store;

use clap::{Parser, Subcommand};
use dialer_call_engine::{Engine, EngineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use store::FileRepository;

#[derive(Parser)]
#[command(name = "dialer")]
#[command(about = "Outbound SIP auto-dialer engine")]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(short, long, default_value = "dialer.toml")]
    config: PathBuf,

    /// Campaign/contact/DNC state file (JSON).
    #[arg(long, default_value = "state.json")]
    state: PathBuf,

    /// Directory of `<flow_id>.json` IVR flow files.
    #[arg(long, default_value = "flows")]
    flows_dir: PathBuf,

    /// Directory of `<audio_id>.pcm` prompt files.
    #[arg(long, default_value = "audio")]
    audio_dir: PathBuf,

    /// Append-only JSON-lines call log.
    #[arg(long, default_value = "call_log.jsonl")]
    call_log: PathBuf,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine: register with the PBX and begin dispatching
    /// campaigns. Runs until interrupted.
    Run,
    /// Stop a running engine. Exists for CLI symmetry with `run`; in
    /// this single-process binary, Ctrl-C during `run` does the same
    /// graceful shutdown.
    Stop,
    /// Print the call manager's current concurrency snapshot.
    Status,
    /// Place a single ad-hoc call outside any campaign.
    Dial {
        /// Destination in E.164 form, e.g. +15551234567.
        #[arg(long)]
        to: String,
        /// IVR flow id to run once answered; hangs up immediately if
        /// omitted.
        #[arg(long)]
        flow: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Exit codes per the external-interfaces spec: 0 clean, 2 configuration
/// error, 3 PBX registration failure, 4 unrecoverable internal error.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_REGISTRATION_FAILURE: u8 = 3;
const EXIT_INTERNAL_ERROR: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match EngineConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let repository = match FileRepository::open(&cli.state, cli.flows_dir.clone(), cli.call_log.clone()).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to load state file");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let engine = match Engine::new(config, repository, cli.audio_dir.clone()).await {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to construct engine");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Commands::Run => run_until_interrupted(engine).await,
        Commands::Stop => {
            info!("stop is a no-op outside a running `run` process; send SIGINT to the running process instead");
            ExitCode::SUCCESS
        }
        Commands::Status => {
            let status = engine.status().await;
            println!("{}", serde_json::to_string_pretty(&status_json(&status)).unwrap());
            ExitCode::SUCCESS
        }
        Commands::Dial { to, flow } => match engine.dial_once(&to, flow.as_deref()).await {
            Ok(disposition) => {
                println!("{}", disposition.as_str());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "dial failed");
                ExitCode::from(EXIT_INTERNAL_ERROR)
            }
        },
    }
}

async fn run_until_interrupted(engine: std::sync::Arc<Engine<FileRepository>>) -> ExitCode {
    if let Err(e) = engine.start().await {
        error!(error = %e, "engine failed to start");
        return ExitCode::from(EXIT_REGISTRATION_FAILURE);
    }

    info!("engine running, press Ctrl-C to stop");
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to listen for Ctrl-C, shutting down anyway");
    }

    if let Err(e) = engine.stop().await {
        error!(error = %e, "error during shutdown");
        return ExitCode::from(EXIT_INTERNAL_ERROR);
    }
    ExitCode::SUCCESS
}

fn status_json(status: &dialer_call_engine::call_manager::ManagerStatusSnapshot) -> serde_json::Value {
    serde_json::json!({
        "global_max_concurrent": status.global_max_concurrent,
        "total_active_calls": status.total_active_calls,
        "global_slots_available": status.global_slots_available,
        "pending_contacts": status.pending_contacts,
        "campaigns": status.campaigns.iter().map(|(id, c)| {
            (id.clone(), serde_json::json!({
                "max_concurrent_calls": c.max_concurrent_calls,
                "active_calls": c.active_calls,
                "available_slots": c.available_slots,
                "calls_per_minute": c.calls_per_minute,
                "total_initiated": c.total_initiated,
                "total_completed": c.total_completed,
                "total_failed": c.total_failed,
            }))
        }).collect::<serde_json::Map<String, serde_json::Value>>(),
    })
}
