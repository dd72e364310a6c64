//! Compile-time defaults and the runtime configuration handle.
//!
//! Every tunable has a default below; the orchestrator receives an explicit
//! [`Config`] value so tests (and future deployments) can redirect paths
//! without touching global state.

use std::path::PathBuf;
use std::time::Duration;

/// Seconds of inactivity after which a sensor connection is closed.
pub const SENSOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each consumer's bounded reading buffer.
pub const BUFFER_CAPACITY: usize = 15;

/// Maximum simultaneous connections sharing one peer IP address.
pub const MAX_CONNECTIONS_PER_IP: usize = 5;

/// SQLite connection string for the readings database.
pub const DB_URL: &str = "sqlite:sensordata.db?mode=rwc";

/// Name of the readings table.
pub const DB_TABLE_NAME: &str = "SensorData";

/// How many times a failed database connect is attempted before the
/// gateway gives up.
pub const DB_CONNECT_RETRY_ATTEMPTS: u32 = 3;

/// Pause between database connect attempts.
pub const DB_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Named pipe carrying event-log records to the sink process.
pub const LOG_PIPE_PATH: &str = "thermogate.pipe";

/// Append-only event-log file written by the sink process.
pub const LOG_FILE_PATH: &str = "gateway.log";

/// Optional room-to-sensor mapping file.
pub const MAP_FILE_PATH: &str = "room_sensor.map";

/// Unix stream socket for the administrative channel.
pub const ADMIN_SOCKET_PATH: &str = "/tmp/thermogate-admin.sock";

/// Running-average threshold above which a sensor is reported too hot.
pub const TEMP_TOO_HOT_THRESHOLD: f64 = 30.0;

/// Running-average threshold below which a sensor is reported too cold.
pub const TEMP_TOO_COLD_THRESHOLD: f64 = 15.0;

/// Capacity of the storage worker's local retry queue.
pub const RETRY_QUEUE_CAPACITY: usize = 20;

/// Runtime configuration, constructed by the entry point and handed to
/// [`crate::gateway::run`].
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the sensor listener binds to.
    pub port: u16,
    pub sensor_timeout: Duration,
    pub buffer_capacity: usize,
    pub max_connections_per_ip: usize,
    pub db_url: String,
    pub db_table: String,
    pub db_connect_retry_attempts: u32,
    pub db_connect_retry_delay: Duration,
    pub log_pipe_path: PathBuf,
    pub log_file_path: PathBuf,
    /// `None` disables room resolution entirely.
    pub map_file_path: Option<PathBuf>,
    pub admin_socket_path: PathBuf,
    pub too_hot_threshold: f64,
    pub too_cold_threshold: f64,
    pub retry_queue_capacity: usize,
}

impl Config {
    /// Configuration with every field at its compile-time default.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            sensor_timeout: SENSOR_TIMEOUT,
            buffer_capacity: BUFFER_CAPACITY,
            max_connections_per_ip: MAX_CONNECTIONS_PER_IP,
            db_url: DB_URL.to_string(),
            db_table: DB_TABLE_NAME.to_string(),
            db_connect_retry_attempts: DB_CONNECT_RETRY_ATTEMPTS,
            db_connect_retry_delay: DB_CONNECT_RETRY_DELAY,
            log_pipe_path: PathBuf::from(LOG_PIPE_PATH),
            log_file_path: PathBuf::from(LOG_FILE_PATH),
            map_file_path: Some(PathBuf::from(MAP_FILE_PATH)),
            admin_socket_path: PathBuf::from(ADMIN_SOCKET_PATH),
            too_hot_threshold: TEMP_TOO_HOT_THRESHOLD,
            too_cold_threshold: TEMP_TOO_COLD_THRESHOLD,
            retry_queue_capacity: RETRY_QUEUE_CAPACITY,
        }
    }
}
