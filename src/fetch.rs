/// One complete fetch: run the session, persist progress, export the result
use std::path::PathBuf;

use log::{info, warn};
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::bluetooth::{FetchSession, SessionListener, SessionSettings, SessionState, Transport};
use crate::config::FetchConfig;
use crate::error::SessionError;
use crate::models::CurrentReading;
use crate::storage::{write_history_file, DeviceRegistry, TaskLog};
use crate::utils::{epoch_seconds, format_datetime};

pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Mirrors session progress into tasks.json and reading snapshots into sensors.json
pub struct TaskStatusListener<'a> {
    tasks: &'a TaskLog,
    task_id: &'a str,
    registry: &'a DeviceRegistry,
}

impl<'a> TaskStatusListener<'a> {
    pub fn new(tasks: &'a TaskLog, task_id: &'a str, registry: &'a DeviceRegistry) -> Self {
        Self {
            tasks,
            task_id,
            registry,
        }
    }
}

impl SessionListener for TaskStatusListener<'_> {
    fn on_transition(&mut self, _state: SessionState, status: &str) {
        self.tasks.report(self.task_id, status);
    }

    fn on_current_reading(&mut self, address: &str, reading: &CurrentReading) {
        let epoch = epoch_seconds(&OffsetDateTime::now_utc());
        if let Err(e) = self.registry.record_reading(address, epoch, reading) {
            warn!("Failed to store current reading for {}: {}", address, e);
        }
    }
}

/// Which device to fetch and which task-log entry tracks it
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub address: &'a str,
    pub device_name: &'a str,
    /// Must already exist in the task log
    pub task_id: &'a str,
}

/// Fetch the history of one device and write it to a CSV file
///
/// The task's status is overwritten on every session transition. Returns the
/// path of the CSV file. No file is written when the session fails.
pub async fn fetch_history<T: Transport>(
    transport: &T,
    config: &FetchConfig,
    registry: &DeviceRegistry,
    tasks: &TaskLog,
    request: FetchRequest<'_>,
    cancel: watch::Receiver<bool>,
) -> Result<PathBuf, FetchError> {
    let FetchRequest {
        address,
        device_name,
        task_id,
    } = request;
    let mut listener = TaskStatusListener::new(tasks, task_id, registry);
    let session = FetchSession::new(transport, address, SessionSettings::from(config)).with_cancel(cancel);

    let report = match session.run(&mut listener).await {
        Ok(report) => report,
        Err(SessionError::RetriesExhausted { attempts, last }) => {
            return Err(format!("gave up on {} after {} attempts: {}", address, attempts, last).into());
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        "Fetched {} record(s) from {} after {} failed attempt(s), device clock origin {}",
        report.samples.len(),
        report.address,
        report.retries,
        format_datetime(&report.clock_origin)
    );
    if let Some(reading) = &report.current_reading {
        info!(
            "Current reading of {}: {:.2}°C, {}%, battery {:.2}%",
            report.address, reading.temperature, reading.humidity, reading.battery
        );
    }
    if report.cancelled {
        info!("Session for {} was cancelled, exporting what was collected", address);
    }

    let completed = epoch_seconds(&OffsetDateTime::now_utc());
    let path = match write_history_file(
        &config.export_dir,
        device_name,
        completed,
        &report.samples,
        config.utc_offset,
    ) {
        Ok(path) => path,
        Err(e) => {
            tasks.report(task_id, &format!("Failed to save historical data: {}", e));
            return Err(e.into());
        }
    };

    tasks.report(
        task_id,
        &format!("Saved historical data to {}", path.display()),
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::protocol::tests::history_frame;
    use crate::bluetooth::protocol::{CURRENT_STATUS_CHAR, TIME_CHAR};
    use crate::bluetooth::session::RETRIES_EXHAUSTED_STATUS;
    use crate::error::TransportError;
    use tempfile::{tempdir, TempDir};
    use crate::storage::tasks::TASK_FETCH;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Device that either never answers or streams a fixed set of frames
    struct ScriptedDevice {
        reachable: bool,
        frames: Vec<Vec<u8>>,
        sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    }

    impl ScriptedDevice {
        fn new(reachable: bool, frames: Vec<Vec<u8>>) -> Self {
            Self {
                reachable,
                frames,
                sender: Mutex::new(None),
            }
        }
    }

    impl Transport for ScriptedDevice {
        type Connection = ();

        async fn connect(&self, _address: &str) -> Result<(), TransportError> {
            if self.reachable {
                Ok(())
            } else {
                Err(TransportError::Disconnected)
            }
        }

        async fn read_characteristic(&self, _: &(), uuid: bluer::Uuid) -> Result<Vec<u8>, TransportError> {
            match uuid {
                u if u == TIME_CHAR => Ok(3600i32.to_le_bytes().to_vec()),
                u if u == CURRENT_STATUS_CHAR => Ok(vec![0x34, 0x08, 45, 0x4C, 0x0B]),
                u => Err(TransportError::CharacteristicNotFound(u)),
            }
        }

        async fn subscribe(&self, _: &(), _: bluer::Uuid) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
            let (tx, rx) = mpsc::channel(16);
            for frame in &self.frames {
                tx.try_send(frame.clone()).unwrap();
            }
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self, _: &(), _: bluer::Uuid) -> Result<(), TransportError> {
            self.sender.lock().unwrap().take();
            Ok(())
        }

        async fn disconnect(&self, _: ()) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: FetchConfig,
        registry: DeviceRegistry,
        tasks: TaskLog,
        task_id: String,
        _cancel_tx: watch::Sender<bool>,
        cancel_rx: watch::Receiver<bool>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let config = FetchConfig {
            sensors_file: dir.path().join("sensors.json"),
            tasks_file: dir.path().join("tasks.json"),
            export_dir: dir.path().join("export"),
            ..FetchConfig::default()
        };
        let registry = DeviceRegistry::new(&config.sensors_file);
        let tasks = TaskLog::new(&config.tasks_file);
        registry.ensure_exists().unwrap();
        tasks.ensure_exists().unwrap();
        registry.record_scan(&["A4:C1:38:00:00:01".to_string()]).unwrap();
        let task_id = tasks.start(TASK_FETCH, "Trying to connect").unwrap();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Fixture {
            _dir: dir,
            config,
            registry,
            tasks,
            task_id,
            _cancel_tx: cancel_tx,
            cancel_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_writes_csv_snapshot_and_status() {
        let f = fixture();
        let device = ScriptedDevice::new(
            true,
            vec![
                history_frame(1, 50, 215, 60, 200, 55),
                history_frame(2, 650, 210, 58, 199, 54),
            ],
        );

        let path = fetch_history(
            &device,
            &f.config,
            &f.registry,
            &f.tasks,
            FetchRequest {
                address: "A4:C1:38:00:00:01",
                device_name: "Office",
                task_id: &f.task_id,
            },
            f.cancel_rx.clone(),
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,"));
        assert!(lines[1].ends_with(",20.0,21.5,55,60"));
        assert!(lines[2].starts_with("2,"));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("DATA_name_Office_t_"));

        let status = f.tasks.status(&f.task_id).unwrap().unwrap();
        assert_eq!(status, format!("Saved historical data to {}", path.display()));

        let devices = f.registry.load().unwrap();
        let snapshots = &devices["A4:C1:38:00:00:01"].records;
        assert_eq!(snapshots.len(), 1);
        let reading = snapshots.values().next().unwrap();
        assert_eq!(reading.temperature, 21.0);
        assert_eq!(reading.humidity, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_device_leaves_failure_status_and_no_csv() {
        let f = fixture();
        let device = ScriptedDevice::new(false, Vec::new());

        let result = fetch_history(
            &device,
            &f.config,
            &f.registry,
            &f.tasks,
            FetchRequest {
                address: "A4:C1:38:00:00:01",
                device_name: "Office",
                task_id: &f.task_id,
            },
            f.cancel_rx.clone(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            f.tasks.status(&f.task_id).unwrap().as_deref(),
            Some(RETRIES_EXHAUSTED_STATUS)
        );
        assert!(!f.config.export_dir.exists());
    }
}
