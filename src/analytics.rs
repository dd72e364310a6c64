//! The analytics consumer: per-sensor running averages and the thermal
//! alert state machine.
//!
//! Alerts fire only on state *transitions*: entering TOO_HOT or TOO_COLD
//! logs a warning, returning to NORMAL logs an info record, and repeated
//! readings in the same state stay silent. Swinging straight between hot
//! and cold emits the entering-state warning with no intermediate
//! "normal" record.

use crate::buffer::ReadingBuffer;
use crate::logging::Logger;
use crate::reading::Reading;
use crate::roommap::RoomMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Thermal classification of a sensor's running average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalState {
    Normal,
    TooCold,
    TooHot,
}

/// One alert produced by a state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub sensor_id: u16,
    pub room_id: Option<u32>,
    pub state: ThermalState,
    pub running_avg: f64,
}

#[derive(Debug)]
struct SensorStats {
    sum: f64,
    count: u64,
    last_state: ThermalState,
}

impl SensorStats {
    fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            last_state: ThermalState::Normal,
        }
    }

    /// Fold in one value and return the new running average.
    fn record(&mut self, value: f64) -> f64 {
        self.sum += value;
        self.count += 1;
        self.sum / self.count as f64
    }
}

/// The analytics worker. Owns its statistics table exclusively; nothing
/// else in the gateway touches it.
#[derive(Debug)]
pub struct Analytics {
    stats: HashMap<u16, SensorStats>,
    map: Arc<RoomMap>,
    logger: Logger,
    too_cold: f64,
    too_hot: f64,
}

impl Analytics {
    pub fn new(map: Arc<RoomMap>, logger: Logger, too_cold: f64, too_hot: f64) -> Self {
        Self {
            stats: HashMap::new(),
            map,
            logger,
            too_cold,
            too_hot,
        }
    }

    /// Consume readings until the buffer reports shutdown.
    pub async fn run(mut self, buffer: Arc<ReadingBuffer>) {
        self.logger.info("Data manager started.");
        while let Ok(reading) = buffer.remove().await {
            if let Some(alert) = self.process(reading) {
                self.emit(&alert);
            }
        }
        self.logger.info("Data manager finished cleanup.");
    }

    /// Account for one reading; returns the alert if its state changed.
    fn process(&mut self, reading: Reading) -> Option<Alert> {
        if !reading.is_valid_id() {
            self.logger.warning(format!(
                "Received sensor data with invalid sensor node ID {}",
                reading.sensor_id
            ));
            return None;
        }

        let stats = self
            .stats
            .entry(reading.sensor_id)
            .or_insert_with(SensorStats::new);
        let running_avg = stats.record(reading.value);
        let state = classify(running_avg, self.too_cold, self.too_hot);

        debug!(
            sensor_id = reading.sensor_id,
            value = reading.value,
            count = stats.count,
            running_avg,
            "reading processed"
        );

        if state == stats.last_state {
            return None;
        }
        stats.last_state = state;
        Some(Alert {
            sensor_id: reading.sensor_id,
            room_id: self.map.room_for(reading.sensor_id),
            state,
            running_avg,
        })
    }

    fn emit(&self, alert: &Alert) {
        let place = match alert.room_id {
            Some(room) => format!("sensor node {} in room {}", alert.sensor_id, room),
            None => format!("sensor node {}", alert.sensor_id),
        };
        match alert.state {
            ThermalState::TooHot => self.logger.warning(format!(
                "{place} reports it's too hot (running avg temperature = {:.2})",
                alert.running_avg
            )),
            ThermalState::TooCold => self.logger.warning(format!(
                "{place} reports it's too cold (running avg temperature = {:.2})",
                alert.running_avg
            )),
            ThermalState::Normal => self.logger.info(format!(
                "{place} temperature has returned to normal (running avg temperature = {:.2})",
                alert.running_avg
            )),
        }
    }
}

fn classify(avg: f64, too_cold: f64, too_hot: f64) -> ThermalState {
    if avg < too_cold {
        ThermalState::TooCold
    } else if avg > too_hot {
        ThermalState::TooHot
    } else {
        ThermalState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadingBuffer;

    fn analytics() -> Analytics {
        Analytics::new(Arc::new(RoomMap::empty()), Logger::disabled(), 15.0, 30.0)
    }

    fn analytics_with_map(contents: &str) -> Analytics {
        Analytics::new(
            Arc::new(RoomMap::parse(contents)),
            Logger::disabled(),
            15.0,
            30.0,
        )
    }

    fn reading(id: u16, value: f64) -> Reading {
        Reading {
            sensor_id: id,
            value,
            ts: 1_700_000_000,
        }
    }

    #[test]
    fn values_within_thresholds_raise_no_alert() {
        let mut a = analytics();
        assert_eq!(a.process(reading(7, 20.0)), None);
        assert_eq!(a.process(reading(7, 21.0)), None);
        assert_eq!(a.process(reading(7, 22.0)), None);
    }

    #[test]
    fn hot_alert_fires_once_then_suppresses() {
        let mut a = analytics();

        // avg 35.0 -> TOO_HOT
        let alert = a.process(reading(9, 35.0)).unwrap();
        assert_eq!(alert.state, ThermalState::TooHot);
        assert_eq!(alert.sensor_id, 9);

        // avg 35.5, still hot: suppressed
        assert_eq!(a.process(reading(9, 36.0)), None);

        // avg (35+36+10)/3 = 27 -> back to NORMAL
        let alert = a.process(reading(9, 10.0)).unwrap();
        assert_eq!(alert.state, ThermalState::Normal);
        assert!((alert.running_avg - 27.0).abs() < 1e-9);
    }

    #[test]
    fn cold_alert_and_recovery() {
        let mut a = analytics();
        let alert = a.process(reading(3, 5.0)).unwrap();
        assert_eq!(alert.state, ThermalState::TooCold);

        // avg (5+40)/2 = 22.5 -> NORMAL
        let alert = a.process(reading(3, 40.0)).unwrap();
        assert_eq!(alert.state, ThermalState::Normal);
    }

    #[test]
    fn hot_to_cold_swings_without_normal_in_between() {
        let mut a = analytics();
        assert_eq!(
            a.process(reading(4, 100.0)).unwrap().state,
            ThermalState::TooHot
        );
        // avg (100 - 200) / 2 = -50 -> straight to TOO_COLD
        assert_eq!(
            a.process(reading(4, -200.0)).unwrap().state,
            ThermalState::TooCold
        );
    }

    #[test]
    fn invalid_sensor_id_is_dropped() {
        let mut a = analytics();
        assert_eq!(a.process(reading(0, 99.0)), None);
        assert!(a.stats.is_empty());
    }

    #[test]
    fn alert_carries_the_room_when_mapped() {
        let mut a = analytics_with_map("4,9\n");
        let alert = a.process(reading(9, 35.0)).unwrap();
        assert_eq!(alert.room_id, Some(4));

        // Unmapped sensors alert without a room.
        let alert = a.process(reading(77, 35.0)).unwrap();
        assert_eq!(alert.room_id, None);
    }

    #[test]
    fn sensors_are_tracked_independently() {
        let mut a = analytics();
        assert!(a.process(reading(1, 35.0)).is_some());
        // Sensor 2's first hot reading alerts even though sensor 1 is
        // already in the hot state.
        assert!(a.process(reading(2, 40.0)).is_some());
        assert_eq!(a.stats.len(), 2);
    }

    #[test]
    fn boundary_values_are_normal() {
        // Classification is strict: only strictly-beyond-threshold
        // averages alert.
        assert_eq!(classify(30.0, 15.0, 30.0), ThermalState::Normal);
        assert_eq!(classify(15.0, 15.0, 30.0), ThermalState::Normal);
        assert_eq!(classify(30.01, 15.0, 30.0), ThermalState::TooHot);
        assert_eq!(classify(14.99, 15.0, 30.0), ThermalState::TooCold);
    }

    #[tokio::test]
    async fn run_exits_on_buffer_shutdown() {
        let buffer = Arc::new(ReadingBuffer::new(4));
        buffer.insert(reading(7, 20.0)).await.unwrap();
        buffer.signal_shutdown();
        // Drains the pending reading, then observes the sentinel and
        // returns.
        analytics().run(buffer).await;
    }
}
