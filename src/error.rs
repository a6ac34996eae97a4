/// Error types shared by the decoder, transport, session and storage layers
use std::time::Duration;

use bluer::Uuid;
use thiserror::Error;

/// Failures while turning raw characteristic bytes into typed values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed history record: expected {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },

    #[error("malformed time reference: {0} bytes")]
    MalformedTime(usize),

    #[error("malformed current status: {0} bytes")]
    MalformedStatus(usize),

    #[error("timestamp out of range: {0} seconds from the reference")]
    TimestampOutOfRange(i64),
}

/// Failures reported by the BLE transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("device disconnected")]
    Disconnected,
}

/// Terminal outcomes of a fetch session that did not complete
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to connect after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: TransportError,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("could not resolve device clock: {0}")]
    Clock(DecodeError),

    #[error("history notifications stopped before the session finished")]
    NotificationsClosed,

    #[error("session cancelled")]
    Cancelled,
}

/// Failures while reading or writing the registry, task log or CSV export
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Invalid configuration values read from the environment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a number, got '{value}'")]
    NotANumber { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("UTC_OFFSET_HOURS out of range: {0}")]
    OffsetOutOfRange(i8),
}
