//! Operator CLI for shared circuit-breaker state.
//!
//! Opens the configured substrate directly, so it sees exactly what every
//! process sharing the region sees.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use circuit_state::config::{load_config, BackendKind, StateConfig};
use circuit_state::observability::logging::init_logging;
use circuit_state::{CircuitStateStore, MetricType, SharedRegion, StateStorage};

#[derive(Parser)]
#[command(name = "circuit-state")]
#[command(about = "Inspect and drive shared circuit-breaker state", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the shared region if missing and verify its geometry
    Init,
    /// Show shared region occupancy
    Inspect,
    /// Delete expired and malformed slots
    Sweep,
    /// Show the circuit state of a command
    Status { command_key: String },
    /// Trip a command's circuit
    Open {
        command_key: String,
        #[arg(long, default_value_t = 5000)]
        sleep_window_ms: u64,
    },
    /// Close a command's circuit
    Close { command_key: String },
    /// Ask for the half-open probe slot
    Probe {
        command_key: String,
        #[arg(long, default_value_t = 5000)]
        sleep_window_ms: u64,
    },
    /// Read or modify a bucket counter
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },
}

#[derive(Subcommand)]
enum BucketAction {
    Get {
        command_key: String,
        metric: MetricType,
        index: u64,
    },
    Incr {
        command_key: String,
        metric: MetricType,
        index: u64,
    },
    Reset {
        command_key: String,
        metric: MetricType,
        index: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => StateConfig::default(),
    };
    init_logging(&config.observability);

    if config.backend.kind == BackendKind::Memory {
        tracing::warn!("Memory backend selected; state does not outlive this invocation");
    }

    let output = match cli.command {
        Commands::Init => region_report(&config, true)?,
        Commands::Inspect => region_report(&config, false)?,
        Commands::Sweep => {
            let store = CircuitStateStore::from_config(&config)?;
            let swept = store.slots().sweep_expired()?;
            json!({ "swept": swept })
        }
        Commands::Status { command_key } => {
            let store = CircuitStateStore::from_config(&config)?;
            circuit_report(&store, &command_key)?
        }
        Commands::Open {
            command_key,
            sleep_window_ms,
        } => {
            let store = CircuitStateStore::from_config(&config)?;
            store.open_circuit(&command_key, sleep_window_ms)?;
            circuit_report(&store, &command_key)?
        }
        Commands::Close { command_key } => {
            let store = CircuitStateStore::from_config(&config)?;
            store.close_circuit(&command_key)?;
            circuit_report(&store, &command_key)?
        }
        Commands::Probe {
            command_key,
            sleep_window_ms,
        } => {
            let store = CircuitStateStore::from_config(&config)?;
            let granted = store.allow_single_test(&command_key, sleep_window_ms)?;
            json!({ "command_key": command_key, "granted": granted })
        }
        Commands::Bucket { action } => {
            let store = CircuitStateStore::from_config(&config)?;
            bucket_report(&store, action)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn region_report(config: &StateConfig, create: bool) -> Result<Value, Box<dyn std::error::Error>> {
    if config.backend.kind != BackendKind::SharedRegion {
        return Err("region commands require backend.kind = \"shared_region\"".into());
    }

    let mut region_config = config.backend.region.clone();
    region_config.create = create && region_config.create;
    let region = SharedRegion::open(&region_config)?;

    Ok(json!({
        "path": region.path().display().to_string(),
        "stats": region.stats(),
    }))
}

fn circuit_report(
    store: &CircuitStateStore,
    command_key: &str,
) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(json!({
        "command_key": command_key,
        "circuit": store.snapshot(command_key)?,
    }))
}

fn bucket_report(
    store: &CircuitStateStore,
    action: BucketAction,
) -> Result<Value, Box<dyn std::error::Error>> {
    let (command_key, metric, index) = match &action {
        BucketAction::Get {
            command_key,
            metric,
            index,
        }
        | BucketAction::Incr {
            command_key,
            metric,
            index,
        }
        | BucketAction::Reset {
            command_key,
            metric,
            index,
        } => (command_key.as_str(), *metric, *index),
    };

    match &action {
        BucketAction::Get { .. } => {}
        BucketAction::Incr { .. } => store.increment_bucket(command_key, metric, index)?,
        BucketAction::Reset { .. } => store.reset_bucket(command_key, metric, index)?,
    }

    Ok(json!({
        "command_key": command_key,
        "metric": metric,
        "index": index,
        "count": store.get_bucket(command_key, metric, index)?,
    }))
}
