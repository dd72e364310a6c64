//! A TCP sensor data gateway.
//!
//! Sensor nodes stream 10-byte temperature frames over TCP. The gateway
//! fans every accepted reading out to two independent consumers — an
//! analytics path maintaining per-sensor running averages with threshold
//! alerts, and a storage path persisting each reading to SQLite — while a
//! dedicated sink process drains the event log through a named pipe and a
//! Unix-socket control channel answers live status queries.

pub mod admin;
pub mod analytics;
pub mod buffer;
pub mod clients;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod reading;
pub mod roommap;
pub mod server;
pub mod sink;
pub mod storage;
pub mod sysmon;

pub use config::Config;
pub use error::Error;
pub use reading::Reading;

pub type Result<T> = std::result::Result<T, Error>;
