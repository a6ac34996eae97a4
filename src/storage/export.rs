/// CSV export of a completed session's history
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use time::UtcOffset;

use crate::error::StorageError;
use crate::models::HistorySample;
use crate::utils::{format_sample_timestamp, sanitize_file_component};

/// One CSV row; field order is the column order
#[derive(Debug, Serialize)]
struct HistoryRow {
    #[serde(rename = "Index")]
    index: u32,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Min Temp")]
    min_temperature: f32,
    #[serde(rename = "Max Temp")]
    max_temperature: f32,
    #[serde(rename = "Min Humidity")]
    min_humidity: u8,
    #[serde(rename = "Max Humidity")]
    max_humidity: u8,
}

/// `DATA_name_{name}_t_{epoch}.csv`
pub fn export_file_name(device_name: &str, completed_epoch: i64) -> String {
    format!(
        "DATA_name_{}_t_{}.csv",
        sanitize_file_component(device_name),
        completed_epoch
    )
}

/// Write the header and one row per sample, in the order given
pub fn write_history_csv<W: Write>(
    writer: W,
    samples: &[HistorySample],
    offset: UtcOffset,
) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(writer);

    // Header must be present even when no samples arrived
    if samples.is_empty() {
        wtr.write_record([
            "Index",
            "Timestamp",
            "Min Temp",
            "Max Temp",
            "Min Humidity",
            "Max Humidity",
        ])?;
    }

    for sample in samples {
        wtr.serialize(HistoryRow {
            index: sample.index,
            timestamp: format_sample_timestamp(&sample.timestamp, offset),
            min_temperature: sample.min_temperature,
            max_temperature: sample.max_temperature,
            min_humidity: sample.min_humidity,
            max_humidity: sample.max_humidity,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

/// Create `dir/DATA_name_..._t_....csv` and write the series into it
pub fn write_history_file(
    dir: &Path,
    device_name: &str,
    completed_epoch: i64,
    samples: &[HistorySample],
    offset: UtcOffset,
) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(device_name, completed_epoch));
    let file = File::create(&path)?;
    write_history_csv(file, samples, offset)?;
    info!("Saved {} historical records to {}", samples.len(), path.display());
    Ok(path)
}
