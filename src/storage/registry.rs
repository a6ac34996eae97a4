/// sensors.json: known devices, operator-given names and reading snapshots
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::StorageError;
use crate::models::{CurrentReading, DeviceRecord};
use crate::storage::files::{ensure_json_file, read_json, write_json};

pub const STATUS_AVAILABLE: &str = "Available";
pub const STATUS_UNAVAILABLE: &str = "Unavailable";

pub type Devices = BTreeMap<String, DeviceRecord>;

/// File-backed registry of discovered sensors, keyed by address
///
/// Entries are only ever added or updated, never removed.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    path: PathBuf,
}

impl DeviceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_exists(&self) -> Result<(), StorageError> {
        ensure_json_file(&self.path)
    }

    pub fn load(&self) -> Result<Devices, StorageError> {
        read_json(&self.path)
    }

    pub fn save(&self, devices: &Devices) -> Result<(), StorageError> {
        write_json(&self.path, devices)?;
        info!("Saved {} device(s) to {}", devices.len(), self.path.display());
        Ok(())
    }

    /// Merge one scan result into the registry
    ///
    /// Unknown addresses are added without a name. Every known device is
    /// marked available or unavailable depending on whether it was seen.
    /// Returns `(address, name)` for the devices seen in this scan.
    pub fn record_scan(&self, seen: &[String]) -> Result<Vec<(String, Option<String>)>, StorageError> {
        let mut devices = self.load()?;

        for address in seen {
            devices.entry(address.clone()).or_insert_with(|| DeviceRecord {
                address: address.clone(),
                ..Default::default()
            });
        }
        for (address, record) in devices.iter_mut() {
            let status = if seen.contains(address) {
                STATUS_AVAILABLE
            } else {
                STATUS_UNAVAILABLE
            };
            record.status = Some(status.to_string());
        }

        self.save(&devices)?;

        Ok(seen
            .iter()
            .filter_map(|address| devices.get(address))
            .map(|record| (record.address.clone(), record.name.clone()))
            .collect())
    }

    pub fn set_name(&self, address: &str, name: &str) -> Result<(), StorageError> {
        let mut devices = self.load()?;
        let record = devices
            .get_mut(address)
            .ok_or_else(|| StorageError::UnknownDevice(address.to_string()))?;
        record.name = Some(name.to_string());
        self.save(&devices)
    }

    /// Store a current-reading snapshot under `epoch` seconds
    pub fn record_reading(
        &self,
        address: &str,
        epoch: i64,
        reading: &CurrentReading,
    ) -> Result<(), StorageError> {
        let mut devices = self.load()?;
        let record = devices
            .entry(address.to_string())
            .or_insert_with(|| DeviceRecord {
                address: address.to_string(),
                ..Default::default()
            });
        record.records.insert(epoch.to_string(), reading.clone());
        self.save(&devices)
    }
}
