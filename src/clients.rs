//! The ingress client table.
//!
//! One record per live sensor connection, guarded by a single mutex so the
//! administrative channel can read a consistent snapshot while the ingress
//! tasks mutate it. Records are created at accept time and removed when the
//! owning connection task ends, whatever the reason.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

/// Outcome of recording the sensor id carried by a parsed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorIdChange {
    /// First valid frame on this connection.
    First,
    /// The id differs from the one previously seen; carries the old id.
    Changed(u16),
    Same,
}

#[derive(Debug)]
struct ClientRecord {
    addr: SocketAddr,
    connected_at: Instant,
    last_activity: Instant,
    sensor_id: Option<u16>,
}

#[derive(Debug, Default)]
struct TableState {
    clients: HashMap<u64, ClientRecord>,
    next_token: u64,
}

/// Mutex-guarded registry of live sensor connections.
#[derive(Debug, Default)]
pub struct ClientTable {
    state: Mutex<TableState>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection unless its peer IP already holds
    /// `max_per_ip` live records. Returns the connection token on success.
    ///
    /// The count-and-insert happens under one lock acquisition, so the
    /// per-IP limit cannot be overshot by concurrent accepts.
    pub fn try_register(&self, addr: SocketAddr, max_per_ip: usize) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        let from_same_ip = state
            .clients
            .values()
            .filter(|c| c.addr.ip() == addr.ip())
            .count();
        if from_same_ip >= max_per_ip {
            return None;
        }
        state.next_token += 1;
        let token = state.next_token;
        let now = Instant::now();
        state.clients.insert(
            token,
            ClientRecord {
                addr,
                connected_at: now,
                last_activity: now,
                sensor_id: None,
            },
        );
        Some(token)
    }

    /// Number of live records sharing `addr`'s IP, the new arrival included.
    pub fn connections_from(&self, addr: &SocketAddr) -> usize {
        let state = self.state.lock().unwrap();
        state
            .clients
            .values()
            .filter(|c| c.addr.ip() == addr.ip())
            .count()
    }

    /// Refresh the record's last-activity timestamp. Called only after a
    /// successfully parsed frame; `Instant::now()` keeps it monotonic
    /// non-decreasing.
    pub fn touch(&self, token: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clients.get_mut(&token) {
            c.last_activity = Instant::now();
        }
    }

    /// Record the sensor id observed in a frame and report how it relates
    /// to what the record already knew.
    pub fn observe_sensor(&self, token: u64, sensor_id: u16) -> SensorIdChange {
        let mut state = self.state.lock().unwrap();
        let Some(c) = state.clients.get_mut(&token) else {
            return SensorIdChange::Same;
        };
        match c.sensor_id {
            None => {
                c.sensor_id = Some(sensor_id);
                SensorIdChange::First
            }
            Some(old) if old != sensor_id => {
                c.sensor_id = Some(sensor_id);
                SensorIdChange::Changed(old)
            }
            Some(_) => SensorIdChange::Same,
        }
    }

    /// Sensor id currently associated with the connection, if any frame
    /// has been parsed yet.
    pub fn sensor_id(&self, token: u64) -> Option<u16> {
        let state = self.state.lock().unwrap();
        state.clients.get(&token).and_then(|c| c.sensor_id)
    }

    pub fn remove(&self, token: u64) {
        let mut state = self.state.lock().unwrap();
        state.clients.remove(&token);
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().clients.len()
    }

    /// Formatted per-connection table for the administrative channel.
    pub fn snapshot(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();
        let _ = writeln!(out, "--- Active Connections ({}) ---", state.clients.len());

        let mut tokens: Vec<_> = state.clients.keys().copied().collect();
        tokens.sort_unstable();
        for token in tokens {
            let c = &state.clients[&token];
            let uptime = c.connected_at.elapsed().as_secs();
            let _ = writeln!(
                out,
                "  Sensor ID: {:<5} | IP: {:<15} | Port: {:<5} | Conn: {:<3} | Connected: {:02}:{:02}:{:02}",
                c.sensor_id.unwrap_or(0),
                c.addr.ip(),
                c.addr.port(),
                token,
                uptime / 3600,
                (uptime % 3600) / 60,
                uptime % 60,
            );
        }
        out
    }
}
