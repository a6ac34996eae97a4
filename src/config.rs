use std::env;
use std::path::PathBuf;

use log::info;
use time::UtcOffset;

use crate::error::ConfigError;

/// Advertised name of the Xiaomi Mijia temperature/humidity sensor
pub const DEFAULT_SENSOR_NAME: &str = "LYWSD03MMC";

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub connect_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub first_record_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub scan_duration_secs: u64,
    pub sensor_name: String,
    pub sensors_file: PathBuf,
    pub tasks_file: PathBuf,
    pub export_dir: PathBuf,
    pub utc_offset: UtcOffset,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff_secs: 5,
            connect_timeout_secs: 30,
            stale_after_secs: 10,
            first_record_timeout_secs: 60,
            poll_interval_secs: 1,
            scan_duration_secs: 30,
            sensor_name: DEFAULT_SENSOR_NAME.to_string(),
            sensors_file: PathBuf::from("sensors.json"),
            tasks_file: PathBuf::from("tasks.json"),
            export_dir: PathBuf::from("."),
            utc_offset: UtcOffset::UTC,
        }
    }
}

impl FetchConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            "Config: retries={} backoff={}s stale_after={}s poll={}s scan={}s sensor='{}'",
            config.max_retries,
            config.retry_backoff_secs,
            config.stale_after_secs,
            config.poll_interval_secs,
            config.scan_duration_secs,
            config.sensor_name
        );
        Ok(config)
    }

    /// Build a config from any key/value source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_retries = read_number(&lookup, "MAX_RETRIES", defaults.max_retries)?;
        let retry_backoff_secs = read_number(&lookup, "RETRY_BACKOFF_SECS", defaults.retry_backoff_secs)?;
        let connect_timeout_secs =
            read_positive(&lookup, "CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs)?;
        let stale_after_secs = read_positive(&lookup, "STALE_AFTER_SECS", defaults.stale_after_secs)?;
        let first_record_timeout_secs = read_positive(
            &lookup,
            "FIRST_RECORD_TIMEOUT_SECS",
            defaults.first_record_timeout_secs,
        )?;
        let poll_interval_secs = read_positive(&lookup, "POLL_INTERVAL_SECS", defaults.poll_interval_secs)?;
        let scan_duration_secs = read_positive(&lookup, "SCAN_DURATION_SECS", defaults.scan_duration_secs)?;

        if max_retries == 0 {
            return Err(ConfigError::Zero("MAX_RETRIES"));
        }

        let offset_hours: i8 = read_number(&lookup, "UTC_OFFSET_HOURS", 0)?;
        let utc_offset = UtcOffset::from_hms(offset_hours, 0, 0)
            .map_err(|_| ConfigError::OffsetOutOfRange(offset_hours))?;

        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(FetchConfig {
            max_retries,
            retry_backoff_secs,
            connect_timeout_secs,
            stale_after_secs,
            first_record_timeout_secs,
            poll_interval_secs,
            scan_duration_secs,
            sensor_name: text("SENSOR_NAME").unwrap_or(defaults.sensor_name),
            sensors_file: text("SENSORS_FILE").map(PathBuf::from).unwrap_or(defaults.sensors_file),
            tasks_file: text("TASKS_FILE").map(PathBuf::from).unwrap_or(defaults.tasks_file),
            export_dir: text("EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            utc_offset,
        })
    }
}

fn read_number<F, N>(lookup: &F, name: &'static str, default: N) -> Result<N, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    N: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::NotANumber {
            name,
            value: raw,
        }),
        _ => Ok(default),
    }
}

fn read_positive<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_number(lookup, name, default)? {
        0 => Err(ConfigError::Zero(name)),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = FetchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, FetchConfig::default());
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.retry_backoff_secs, 5);
        assert_eq!(config.stale_after_secs, 10);
        assert_eq!(config.sensor_name, "LYWSD03MMC");
    }

    #[test]
    fn reads_overrides() {
        let config = FetchConfig::from_lookup(lookup(&[
            ("MAX_RETRIES", "3"),
            ("STALE_AFTER_SECS", " 20 "),
            ("EXPORT_DIR", "/tmp/history"),
            ("UTC_OFFSET_HOURS", "-5"),
            ("SENSOR_NAME", ""),
        ]))
        .unwrap();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.stale_after_secs, 20);
        assert_eq!(config.export_dir, PathBuf::from("/tmp/history"));
        assert_eq!(config.utc_offset, UtcOffset::from_hms(-5, 0, 0).unwrap());
        assert_eq!(config.sensor_name, DEFAULT_SENSOR_NAME);
    }

    #[test]
    fn rejects_invalid_values() {
        assert_eq!(
            FetchConfig::from_lookup(lookup(&[("MAX_RETRIES", "ten")])),
            Err(ConfigError::NotANumber {
                name: "MAX_RETRIES",
                value: "ten".to_string()
            })
        );
        assert_eq!(
            FetchConfig::from_lookup(lookup(&[("MAX_RETRIES", "0")])),
            Err(ConfigError::Zero("MAX_RETRIES"))
        );
        assert_eq!(
            FetchConfig::from_lookup(lookup(&[("POLL_INTERVAL_SECS", "0")])),
            Err(ConfigError::Zero("POLL_INTERVAL_SECS"))
        );
        assert_eq!(
            FetchConfig::from_lookup(lookup(&[("UTC_OFFSET_HOURS", "30")])),
            Err(ConfigError::OffsetOutOfRange(30))
        );
    }
}
