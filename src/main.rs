mod bluetooth;
mod config;
mod error;
mod fetch;
mod history;
mod models;
mod storage;
mod utils;
mod workflow;

use log::{error, info, warn};
use tokio::sync::watch;

use bluetooth::open_adapter;
use config::FetchConfig;
use storage::{DeviceRegistry, TaskLog};
use workflow::{parse_command, print_status, rename_device, Command, Workflow};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match FetchConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let registry = DeviceRegistry::new(&config.sensors_file);
    let tasks = TaskLog::new(&config.tasks_file);
    registry.ensure_exists()?;
    tasks.ensure_exists()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(usage) => {
            error!("{}", usage);
            return Err(usage.into());
        }
    };

    // `status` and `rename` only touch the local files, no adapter needed
    match command {
        Command::Status => {
            return print_status(&registry, &tasks).map_err(|e| e as Box<dyn std::error::Error>);
        }
        Command::Rename { address, name } => {
            return rename_device(&registry, &address, &name).map_err(|e| e as Box<dyn std::error::Error>);
        }
        Command::Interactive => {}
    }

    let adapter = open_adapter().await?;

    // Ctrl+C stops whatever is running; a fetch in progress still exports
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Cancellation requested, finishing up...");
                let _ = cancel_tx.send(true);
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let workflow = Workflow {
        config,
        adapter,
        registry,
        tasks,
        cancel: cancel_rx,
    };

    match workflow.run().await {
        Ok(_) => info!("Program completed successfully"),
        Err(e) => error!("Fatal error: {}", e),
    }

    Ok(())
}
