use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One decoded record from the sensor's history ring buffer
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    pub index: u32,
    pub timestamp: OffsetDateTime,
    pub min_temperature: f32,
    pub min_humidity: u8,
    pub max_temperature: f32,
    pub max_humidity: u8,
}

/// Live reading taken from the current-status characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    #[serde(rename = "Temperature")]
    pub temperature: f32,
    #[serde(rename = "Humidity")]
    pub humidity: u8,
    #[serde(rename = "Voltage")]
    pub voltage: f32,
    #[serde(rename = "Battery")]
    pub battery: f32,
}

/// Persisted entry of sensors.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: String,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Current-reading snapshots keyed by epoch seconds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub records: BTreeMap<String, CurrentReading>,
}

/// Persisted entry of tasks.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task_type: String,
    pub status: String,
}
