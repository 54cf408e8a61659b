use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use stylize::config::Config;
use stylize::core::TaskState;
use stylize::gpu::GpuInventory;
use stylize::orchestration::{Engine, Event, TaskRegistry};
use stylize::storage::DataStore;
use stylize::Result;

/// Stylize - GPU render-job scheduler for neural style transfer
#[derive(Parser, Debug)]
#[command(name = "stylize")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    STYLIZE_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter")]
pub struct Cli {
    /// Enable debug logging (also written to ~/.stylize/stylize.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.stylize/stylize.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the engine and stream every event as JSON lines
    Serve,

    /// Submit one render and follow it to completion
    Render {
        /// Task id; content and style images must already be in the data dir
        id: String,

        /// Settings as a JSON object, merged over the defaults
        #[arg(long, short = 's')]
        settings: Option<String>,
    },

    /// List tasks recovered from the data directory
    Tasks,

    /// Show a GPU telemetry snapshot
    Gpus,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    stylize::log::init_with_debug(cli.debug);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Serve => rt.block_on(run_serve(config)).map(|_| true),
        Command::Render { id, settings } => rt.block_on(run_render(config, id, settings)),
        Command::Tasks => rt.block_on(run_tasks(config)).map(|_| true),
        Command::Gpus => rt.block_on(run_gpus(config)).map(|_| true),
    }
}

/// Start the engine and print events until Ctrl-C.
///
/// Recovered tasks are published before anything else, oldest first, so
/// the first lines are a full snapshot.
async fn run_serve(config: Config) -> Result<()> {
    let engine = Engine::new(&config).await?;
    let mut events = engine.subscribe();
    let handle = engine.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown();
    Ok(())
}

/// Submit one task and follow its render events.
///
/// Returns true if the task finished `done`. Ctrl-C cancels the task.
async fn run_render(config: Config, id: String, settings: Option<String>) -> Result<bool> {
    let raw = match settings {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::Value::Null,
    };

    let handle = Engine::new(&config).await?.start();
    let mut events = handle.subscribe();
    handle.submit(&id, raw).await?;

    let mut interrupted = false;
    let state = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!(task_id = %id, "Interrupted, cancelling render");
                handle.cancel(&id).await;
                interrupted = true;
            }
            event = events.recv() => match event {
                Ok(Event::Render(status)) if status.id.as_str() == id => {
                    let state = status.state;
                    println!("{}", serde_json::to_string(&Event::Render(status))?);
                    if state.is_terminal() {
                        break state;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => break TaskState::Failed,
            },
        }
    };

    // Shutting down kills a render that is still winding down after cancel.
    handle.shutdown();
    Ok(state == TaskState::Done)
}

async fn run_tasks(config: Config) -> Result<()> {
    config.ensure_dirs()?;
    let store = DataStore::new(config.data_dir()?);
    let registry = TaskRegistry::recover(&store).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&registry.statuses(&store))?
    );
    Ok(())
}

async fn run_gpus(config: Config) -> Result<()> {
    let inventory = GpuInventory::from_config(&config).query().await;
    println!("{}", serde_json::to_string_pretty(&inventory.devices)?);
    Ok(())
}
