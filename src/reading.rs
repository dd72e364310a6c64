//! The unit of data flowing through the gateway.

use std::time::{SystemTime, UNIX_EPOCH};

/// Sensor id `0` is reserved as invalid; readings carrying it are dropped
/// by both consumers.
pub const INVALID_SENSOR_ID: u16 = 0;

/// A single temperature reading, immutable once created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub sensor_id: u16,
    pub value: f64,
    /// Seconds since the Unix epoch, stamped at ingress.
    pub ts: i64,
}

impl Reading {
    /// Build a reading stamped with the current wall-clock time.
    pub fn now(sensor_id: u16, value: f64) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self {
            sensor_id,
            value,
            ts,
        }
    }

    pub fn is_valid_id(&self) -> bool {
        self.sensor_id != INVALID_SENSOR_ID
    }
}
