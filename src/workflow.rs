/// Interactive scan → select → fetch loop and the read-only status view
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::bluetooth::{scan_for_sensors, BluerTransport};
use crate::config::FetchConfig;
use crate::fetch::{fetch_history, FetchError, FetchRequest};
use crate::storage::tasks::{TASK_FETCH, TASK_SCAN, TASK_WORKFLOW};
use crate::storage::{DeviceRegistry, TaskLog};
use crate::utils::cancelled;

const NO_DEVICES_RETRY_SECS: u64 = 1;
const STATUS_POLL_SECS: u64 = 1;

/// What the operator picked from the device list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Device(usize),
    Rescan,
}

/// Operator input that could not be used; reported and asked again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    NotANumber,
    OutOfRange,
}

impl SelectionError {
    fn status(&self) -> &'static str {
        match self {
            SelectionError::NotANumber => "Invalid input. Please enter a valid number.",
            SelectionError::OutOfRange => "Invalid selection.",
        }
    }
}

/// Interpret the answer to the device prompt
///
/// `0..count` select a device, `count` itself means rescan.
pub fn parse_selection(input: &str, count: usize) -> Result<Selection, SelectionError> {
    let n: usize = input.trim().parse().map_err(|_| SelectionError::NotANumber)?;
    if n < count {
        Ok(Selection::Device(n))
    } else if n == count {
        Ok(Selection::Rescan)
    } else {
        Err(SelectionError::OutOfRange)
    }
}

/// Read stdin lines on a plain thread and hand them over a channel
///
/// The thread is left blocked on stdin when the workflow ends, so it must not
/// be a runtime blocking task.
fn operator_input() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("Stopped reading stdin: {}", e);
                    break;
                }
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Render the device menu shown to the operator
pub fn device_menu(devices: &[(String, Option<String>)]) -> String {
    let mut menu = String::new();
    for (idx, (address, name)) in devices.iter().enumerate() {
        menu.push_str(&format!(
            "{}: {} ({})\n",
            idx,
            name.as_deref().unwrap_or("Unknown"),
            address
        ));
    }
    menu.push_str(&format!("{}: Rescan devices\n", devices.len()));
    menu
}

/// Everything the interactive loop needs, owned so the fetch can move to a worker
pub struct Workflow {
    pub config: FetchConfig,
    pub adapter: bluer::Adapter,
    pub registry: DeviceRegistry,
    pub tasks: TaskLog,
    pub cancel: watch::Receiver<bool>,
}

impl Workflow {
    /// Scan, let the operator pick a sensor, fetch its history once
    pub async fn run(mut self) -> Result<(), FetchError> {
        let workflow_id = self.tasks.start(TASK_WORKFLOW, "Initializing")?;
        let transport = Arc::new(BluerTransport::new(self.adapter.clone()));
        let mut input = operator_input();

        loop {
            if *self.cancel.borrow() {
                self.tasks.report(&workflow_id, "Cancelled by user.");
                return Ok(());
            }

            self.tasks.report(&workflow_id, "Scanning for BLE devices...");
            let devices = self.scan().await?;

            if devices.is_empty() {
                self.tasks.report(&workflow_id, "No devices found. Retrying...");
                println!("No Mi T/H Sensors found. Retrying in {} second...", NO_DEVICES_RETRY_SECS);
                sleep(Duration::from_secs(NO_DEVICES_RETRY_SECS)).await;
                continue;
            }

            self.tasks.report(&workflow_id, "Devices found. Awaiting user selection.");
            println!("\nAvailable Devices:");
            print!("{}", device_menu(&devices));

            let Some(answer) = self
                .prompt(&mut input, "Enter the number of the device to connect (or rescan): ")
                .await?
            else {
                self.tasks.report(&workflow_id, "Cancelled by user.");
                return Ok(());
            };

            let (address, name) = match parse_selection(&answer, devices.len()) {
                Ok(Selection::Device(idx)) => devices[idx].clone(),
                Ok(Selection::Rescan) => {
                    self.tasks.report(&workflow_id, "Rescanning devices...");
                    println!("Rescanning devices...");
                    continue;
                }
                Err(e) => {
                    self.tasks.report(&workflow_id, e.status());
                    println!("{}", e.status());
                    continue;
                }
            };
            println!("-> {} is selected", address);

            let name = match name {
                Some(name) => name,
                None => match self.ask_name(&mut input, &address).await? {
                    Some(name) => name,
                    None => {
                        self.tasks.report(&workflow_id, "Cancelled by user.");
                        return Ok(());
                    }
                },
            };

            self.tasks
                .report(&workflow_id, &format!("Connecting to {}...", name));

            return match self.fetch_in_background(transport, &address, &name).await {
                Ok(path) => {
                    println!("Saved historical data to {}", path.display());
                    self.tasks.report(&workflow_id, "Task completed successfully.");
                    Ok(())
                }
                Err(e) => {
                    self.tasks.report(&workflow_id, &format!("Error occurred: {}", e));
                    Err(e)
                }
            };
        }
    }

    /// One discovery pass, tracked as its own task and merged into the registry
    async fn scan(&self) -> Result<Vec<(String, Option<String>)>, FetchError> {
        let scan_id = self.tasks.start(TASK_SCAN, "running...")?;
        println!("Scanning sensors...({} seconds)", self.config.scan_duration_secs);

        let seen = scan_for_sensors(
            &self.adapter,
            &self.config.sensor_name,
            Duration::from_secs(self.config.scan_duration_secs),
        )
        .await
        .map_err(|e| e.to_string())?;

        let devices = self.registry.record_scan(&seen)?;
        self.tasks.report(&scan_id, "finished");
        Ok(devices)
    }

    async fn prompt(
        &mut self,
        input: &mut mpsc::Receiver<String>,
        question: &str,
    ) -> Result<Option<String>, FetchError> {
        print!("{}", question);
        std::io::stdout().flush()?;

        tokio::select! {
            line = input.recv() => Ok(line),
            _ = cancelled(&mut self.cancel) => Ok(None),
        }
    }

    /// Ask until a non-empty name is given, then persist it
    async fn ask_name(
        &mut self,
        input: &mut mpsc::Receiver<String>,
        address: &str,
    ) -> Result<Option<String>, FetchError> {
        loop {
            let Some(answer) = self.prompt(input, "Enter a name for this device: ").await? else {
                return Ok(None);
            };
            let name = answer.trim();
            if name.is_empty() {
                println!("The name cannot be empty.");
                continue;
            }
            self.registry.set_name(address, name)?;
            info!("Named {} as '{}'", address, name);
            return Ok(Some(name.to_string()));
        }
    }

    /// Run the fetch on a dedicated worker task and follow it through tasks.json
    ///
    /// The foreground never touches the session; it only reads the status text
    /// the worker writes.
    async fn fetch_in_background(
        &self,
        transport: Arc<BluerTransport>,
        address: &str,
        name: &str,
    ) -> Result<PathBuf, FetchError> {
        let task_id = self
            .tasks
            .start(TASK_FETCH, &format!("Trying to connect {}", address))?;

        let mut worker = {
            let config = self.config.clone();
            let registry = self.registry.clone();
            let tasks = self.tasks.clone();
            let task_id = task_id.clone();
            let address = address.to_string();
            let name = name.to_string();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let request = FetchRequest {
                    address: &address,
                    device_name: &name,
                    task_id: &task_id,
                };
                fetch_history(transport.as_ref(), &config, &registry, &tasks, request, cancel).await
            })
        };

        let mut ticker = interval(Duration::from_secs(STATUS_POLL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status = String::new();

        let result = loop {
            tokio::select! {
                joined = &mut worker => break joined,
                _ = ticker.tick() => {
                    match self.tasks.status(&task_id) {
                        Ok(Some(status)) if status != last_status => {
                            println!("[{}] {}", name, status);
                            last_status = status;
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Could not read task status: {}", e),
                    }
                }
            }
        };

        result?
    }
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Interactive,
    Status,
    Rename { address: String, name: String },
}

/// Interpret the command-line arguments (without the program name)
///
/// `rename <address> <name...>` joins the remaining words into the name.
pub fn parse_command(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        None => Ok(Command::Interactive),
        Some("status") if args.len() == 1 => Ok(Command::Status),
        Some("rename") if args.len() >= 3 => {
            let name = args[2..].join(" ");
            if name.trim().is_empty() {
                return Err("The name cannot be empty.".to_string());
            }
            Ok(Command::Rename {
                address: args[1].trim().to_uppercase(),
                name: name.trim().to_string(),
            })
        }
        Some(_) => Err("usage: rust-mijia-history [status | rename <address> <name>]".to_string()),
    }
}

/// Give an already known device a new name
pub fn rename_device(registry: &DeviceRegistry, address: &str, name: &str) -> Result<(), FetchError> {
    registry.set_name(address, name)?;
    info!("Renamed {} to '{}'", address, name);
    println!("{} is now named '{}'", address, name);
    Ok(())
}

/// Print the registry and task log, newest task last
pub fn print_status(registry: &DeviceRegistry, tasks: &TaskLog) -> Result<(), FetchError> {
    let devices = registry.load()?;
    println!("Sensors ({}) in {}:", devices.len(), registry.path().display());
    for (address, record) in &devices {
        let latest = record
            .records
            .iter()
            .next_back()
            .map(|(ts, r)| {
                format!(
                    " last reading @{}: {:.2}°C {}% {:.3}V {:.2}%",
                    ts, r.temperature, r.humidity, r.voltage, r.battery
                )
            })
            .unwrap_or_default();
        println!(
            "  {} {} [{}]{}",
            address,
            record.name.as_deref().unwrap_or("Unknown"),
            record.status.as_deref().unwrap_or("-"),
            latest
        );
    }

    let entries = tasks.load()?;
    println!("Tasks ({}) in {}:", entries.len(), tasks.path().display());
    for (started, task) in &entries {
        println!("  {} {}: {}", started, task.task_type, task.status);
    }
    Ok(())
}
