/// Device clock origin derived from the relative time characteristic
use time::{Duration, OffsetDateTime};

use crate::error::DecodeError;

/// Holds the wall-clock instant at which the device's relative clock read zero
///
/// The device counts seconds since its last reboot, so the origin is fixed for
/// the life of a connection. The first successful resolve wins and every later
/// call returns the stored value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockReference {
    origin: Option<OffsetDateTime>,
}

impl ClockReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the origin from a raw time read taken at `now`
    ///
    /// # Arguments
    /// * `raw` - Bytes of the time characteristic (4 or 5 in practice)
    /// * `now` - Wall-clock instant of the read
    pub fn resolve(&mut self, raw: &[u8], now: OffsetDateTime) -> Result<OffsetDateTime, DecodeError> {
        if let Some(origin) = self.origin {
            return Ok(origin);
        }

        let elapsed = decode_relative_seconds(raw)?;
        let origin = now
            .checked_sub(Duration::seconds(elapsed))
            .ok_or(DecodeError::TimestampOutOfRange(elapsed))?;
        self.origin = Some(origin);
        Ok(origin)
    }

}

/// Interpret `raw` as a little-endian signed integer of its own length
fn decode_relative_seconds(raw: &[u8]) -> Result<i64, DecodeError> {
    if raw.is_empty() || raw.len() > 8 {
        return Err(DecodeError::MalformedTime(raw.len()));
    }

    // Sign-extend from the most significant byte we actually received
    let fill = if raw[raw.len() - 1] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut bytes = [fill; 8];
    bytes[..raw.len()].copy_from_slice(raw);
    Ok(i64::from_le_bytes(bytes))
}
