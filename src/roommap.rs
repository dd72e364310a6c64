//! The read-only room-to-sensor mapping, loaded once at startup.
//!
//! File format: one `room_id,sensor_id` pair per line. Blank lines and
//! lines starting with `#` are skipped; malformed lines and out-of-range
//! sensor ids are logged and skipped rather than failing the load.

use crate::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RoomMap {
    by_sensor: HashMap<u16, u32>,
}

impl RoomMap {
    /// An empty map: every sensor resolves to "no room assigned".
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the mapping file. I/O errors surface to the caller; content
    /// problems only cost the offending lines.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let map = Self::parse(&contents);
        info!(
            path = %path.display(),
            entries = map.len(),
            "room sensor map loaded"
        );
        Ok(map)
    }

    pub fn parse(contents: &str) -> Self {
        let mut by_sensor = HashMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((room_part, sensor_part)) = line.split_once(',') else {
                warn!(line = idx + 1, "invalid format in room sensor map, skipping");
                continue;
            };
            let Ok(room_id) = room_part.trim().parse::<u32>() else {
                warn!(line = idx + 1, "invalid room id in room sensor map, skipping");
                continue;
            };
            // Sensor ids live in 0..=65535; anything else is rejected here
            // so lookups can stay u16.
            let Ok(sensor_id) = sensor_part.trim().parse::<u16>() else {
                warn!(line = idx + 1, "invalid sensor id in room sensor map, skipping");
                continue;
            };

            by_sensor.insert(sensor_id, room_id);
        }
        Self { by_sensor }
    }

    /// Room assigned to the sensor, if any.
    pub fn room_for(&self, sensor_id: u16) -> Option<u32> {
        self.by_sensor.get(&sensor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_sensor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sensor.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_skips_comments() {
        let map = RoomMap::parse("# room,sensor\n1,15\n2,21\n\n3,37\n");
        assert_eq!(map.len(), 3);
        assert_eq!(map.room_for(15), Some(1));
        assert_eq!(map.room_for(21), Some(2));
        assert_eq!(map.room_for(37), Some(3));
        assert_eq!(map.room_for(99), None);
    }

    #[test]
    fn tolerates_whitespace_around_fields() {
        let map = RoomMap::parse("  4 , 12 \n");
        assert_eq!(map.room_for(12), Some(4));
    }

    #[test]
    #[tracing_test::traced_test]
    fn skips_malformed_lines() {
        let map = RoomMap::parse("not-a-pair\n5\n6,\n,7\n8,9\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.room_for(9), Some(8));
        assert!(logs_contain("invalid format in room sensor map"));
    }

    #[test]
    fn skips_out_of_range_sensor_ids() {
        let map = RoomMap::parse("1,65536\n2,-3\n3,100\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.room_for(100), Some(3));
    }

    #[test]
    fn later_entries_win_for_duplicate_sensors() {
        let map = RoomMap::parse("1,10\n2,10\n");
        assert_eq!(map.room_for(10), Some(2));
    }

    #[test]
    fn empty_map_resolves_nothing() {
        assert!(RoomMap::empty().is_empty());
        assert_eq!(RoomMap::empty().room_for(1), None);
    }
}
