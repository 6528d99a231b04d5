//! `rpa-runner` command line.
//!
//! `rpa-runner run <definition>` launches one job through the orchestrator and
//! follows it until it ends. With `--step` the job halts before every step and
//! the terminal answers the gate: Enter continues, `s` stops.

mod render;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use colored::Colorize;
use rr_core::bus::{EventBus, MemoryBus, WebSocketBus};
use rr_core::config::{load_config, CONFIG_FILE_NAME};
use rr_core::engine::Orchestrator;
use rr_core::launcher::validate_process_id;
use rr_protocol::config_models::OrchestratorConfig;
use rr_protocol::ipc::{ControlSignal, Event};
use rr_protocol::process_models::{ProcessStatus, RunMode};
use rr_protocol::request_models::LaunchRequest;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// How long `run` waits for the event bus before going on without it.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long teardown may take once the record is terminal.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "rpa-runner", version, about = "Run RPA jobs under the orchestrator")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job definition and follow it to the end
    Run {
        /// Job definition file handed to the interpreter
        definition: PathBuf,

        /// Process id to run as (default: the file stem)
        #[arg(long)]
        process_id: Option<String>,

        /// Halt before every step and wait for confirmation
        #[arg(long)]
        step: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rr_core=info,rpa_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .await
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).wrap_err("Failed to render configuration")?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            definition,
            process_id,
            step,
        } => {
            let run_mode = if step {
                RunMode::StepByStep
            } else {
                RunMode::RunAll
            };
            run(&config, &definition, process_id, run_mode).await
        }
    }
}

async fn run(
    config: &OrchestratorConfig,
    definition: &Path,
    process_id: Option<String>,
    run_mode: RunMode,
) -> color_eyre::Result<ExitCode> {
    let robot_code = tokio::fs::read_to_string(definition)
        .await
        .wrap_err_with(|| format!("Failed to read {}", definition.display()))?;

    let process_id = match process_id {
        Some(id) => id,
        None => default_process_id(definition),
    };

    // Events are only visible locally on the in-memory bus.
    let (bus, mut events): (Arc<dyn EventBus>, Option<broadcast::Receiver<Event>>) =
        match &config.event_bus.url {
            Some(url) => {
                let bus = WebSocketBus::connect(url.clone());
                if !bus.wait_until_connected(CONNECT_TIMEOUT).await {
                    tracing::warn!(url = %url, "Event bus not reachable yet, events are queued");
                }
                (Arc::new(bus), None)
            }
            None => {
                let bus = MemoryBus::new();
                let events = bus.subscribe_events();
                (Arc::new(bus), Some(events))
            }
        };

    let orchestrator = Orchestrator::new(config, bus);
    let pump = orchestrator.spawn_signal_pump();
    let mut updates = orchestrator.registry().subscribe();

    let request = LaunchRequest::new(&process_id, robot_code)
        .with_user(whoami())
        .with_run_type(run_mode);
    let handle = orchestrator.launch(request).await?;
    println!(
        "{} {} ({}, pid {})",
        "launched".bold(),
        handle.process_id,
        handle.run_mode,
        handle
            .pid
            .map_or_else(|| "?".to_string(), |pid| pid.to_string())
    );

    let mut stdin = stdin_lines();
    let mut stdin_open = true;
    let mut waiting = false;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) if update.execution_id == handle.execution_id => {
                    println!("     {} {}", "status".dimmed(), render::status(update.status));
                    waiting = update.status == ProcessStatus::WaitingStep;
                    if waiting {
                        println!("     {}", "Enter to continue, s to stop".yellow());
                    }
                    if update.status.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed status updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = next_event(&mut events) => {
                if let Some(event) = event {
                    println!("{}", render::event_line(&event));
                }
            }
            line = stdin.recv(), if waiting && stdin_open => {
                waiting = false;
                match line {
                    Some(answer) if answer.trim().eq_ignore_ascii_case("s") => {
                        orchestrator.signal(ControlSignal::stop(&process_id));
                    }
                    Some(_) => orchestrator.signal(ControlSignal::continue_step(&process_id)),
                    None => {
                        println!("     {}", "stdin closed, stopping".yellow());
                        stdin_open = false;
                        orchestrator.signal(ControlSignal::stop(&process_id));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("     {}", "interrupted, stopping".yellow());
                orchestrator.stop(&process_id).await?;
            }
        }
    }

    let record = orchestrator
        .wait_until_settled(&process_id, SETTLE_TIMEOUT)
        .await?;
    if let Some(events) = events.as_mut() {
        while let Ok(event) = events.try_recv() {
            println!("{}", render::event_line(&event));
        }
    }
    pump.abort();

    println!("{}", render::summary(&record));
    match record.status {
        ProcessStatus::Completed => Ok(ExitCode::SUCCESS),
        ProcessStatus::Stopped => Ok(ExitCode::from(130)),
        ProcessStatus::Failed => Ok(ExitCode::FAILURE),
        other => Err(eyre!("process ended in non-terminal state {other}")),
    }
}

/// The next event, or pending forever when events are not observable.
async fn next_event(events: &mut Option<broadcast::Receiver<Event>>) -> Option<Event> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    *events = None;
    None
}

/// Lines typed on stdin. The blocking read runs on a plain thread, outside
/// the runtime.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn default_process_id(definition: &Path) -> String {
    definition
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| validate_process_id(stem).is_ok())
        .map_or_else(
            || format!("local-{}", Uuid::new_v4().simple()),
            str::to_string,
        )
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}
