/// LYWSD03MMC GATT characteristics and their binary payloads
use bluer::Uuid;
use time::{Duration, OffsetDateTime};

use crate::error::DecodeError;
use crate::models::{CurrentReading, HistorySample};

/// Seconds since device boot, 4 or 5 bytes, little-endian signed (read/write)
pub const TIME_CHAR: Uuid = Uuid::from_u128(0xebe0ccb7_7a0a_4b0c_8a1a_6ff2997da3a6);
/// Number of stored records (read)
pub const RECORD_COUNT_CHAR: Uuid = Uuid::from_u128(0xebe0ccb9_7a0a_4b0c_8a1a_6ff2997da3a6);
/// Index of the next record to deliver (read/write)
pub const RECORD_INDEX_CHAR: Uuid = Uuid::from_u128(0xebe0ccba_7a0a_4b0c_8a1a_6ff2997da3a6);
/// History records, one per notification (read/notify)
pub const HISTORY_CHAR: Uuid = Uuid::from_u128(0xebe0ccbc_7a0a_4b0c_8a1a_6ff2997da3a6);
/// Display units, 0x00 = F, 0x01 = C (read/write)
pub const UNITS_CHAR: Uuid = Uuid::from_u128(0xebe0ccbe_7a0a_4b0c_8a1a_6ff2997da3a6);
/// Temperature, humidity and voltage right now (read/notify)
pub const CURRENT_STATUS_CHAR: Uuid = Uuid::from_u128(0xebe0ccc1_7a0a_4b0c_8a1a_6ff2997da3a6);
/// Battery level, 1 byte (read)
pub const BATTERY_CHAR: Uuid = Uuid::from_u128(0xebe0ccc4_7a0a_4b0c_8a1a_6ff2997da3a6);

/// Every characteristic the session resolves on connect
pub const KNOWN_CHARACTERISTICS: [Uuid; 7] = [
    TIME_CHAR,
    RECORD_COUNT_CHAR,
    RECORD_INDEX_CHAR,
    HISTORY_CHAR,
    UNITS_CHAR,
    CURRENT_STATUS_CHAR,
    BATTERY_CHAR,
];

/// Size of one history notification payload
pub const HISTORY_RECORD_LEN: usize = 14;
/// Size of the current-status payload
pub const CURRENT_STATUS_LEN: usize = 5;

// Battery voltage range used for the percentage estimate
const BATTERY_EMPTY_VOLTS: f32 = 2.0;
const BATTERY_FULL_VOLTS: f32 = 3.261;

/// Decode one history notification into a [`HistorySample`]
///
/// Layout (little-endian):
/// - Bytes 0-3: record index (u32)
/// - Bytes 4-7: seconds since the device clock origin (i32)
/// - Bytes 8-9: max temperature in tenths of a degree (i16)
/// - Byte 10: max humidity in percent (u8)
/// - Bytes 11-12: min temperature in tenths of a degree (i16)
/// - Byte 13: min humidity in percent (u8)
///
/// The absolute timestamp is `clock_origin + offset`, so the clock must be
/// resolved before any record can be decoded.
pub fn decode_history_record(
    data: &[u8],
    clock_origin: OffsetDateTime,
) -> Result<HistorySample, DecodeError> {
    if data.len() != HISTORY_RECORD_LEN {
        return Err(DecodeError::MalformedRecord {
            expected: HISTORY_RECORD_LEN,
            actual: data.len(),
        });
    }

    let index = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let offset = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let max_temperature = i16::from_le_bytes([data[8], data[9]]);
    let max_humidity = data[10];
    let min_temperature = i16::from_le_bytes([data[11], data[12]]);
    let min_humidity = data[13];

    let timestamp = clock_origin
        .checked_add(Duration::seconds(offset as i64))
        .ok_or(DecodeError::TimestampOutOfRange(offset as i64))?;

    Ok(HistorySample {
        index,
        timestamp,
        min_temperature: min_temperature as f32 / 10.0,
        min_humidity,
        max_temperature: max_temperature as f32 / 10.0,
        max_humidity,
    })
}

/// Decode the current-status characteristic
///
/// Bytes 0-1 hold temperature in hundredths of a degree, byte 2 humidity and
/// bytes 3-4 battery voltage in millivolts.
pub fn decode_current_reading(data: &[u8]) -> Result<CurrentReading, DecodeError> {
    if data.len() < CURRENT_STATUS_LEN {
        return Err(DecodeError::MalformedStatus(data.len()));
    }

    let temperature = i16::from_le_bytes([data[0], data[1]]) as f32 / 100.0;
    let humidity = data[2];
    let voltage = i16::from_le_bytes([data[3], data[4]]) as f32 / 1000.0;

    Ok(CurrentReading {
        temperature,
        humidity,
        voltage,
        battery: battery_percent(voltage),
    })
}

/// Estimate remaining battery from voltage, rounded to 2 decimals
pub fn battery_percent(voltage: f32) -> f32 {
    let pct = (voltage - BATTERY_EMPTY_VOLTS) / (BATTERY_FULL_VOLTS - BATTERY_EMPTY_VOLTS) * 100.0;
    (pct * 100.0).round() / 100.0
}
