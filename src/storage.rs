//! The storage consumer: persists every accepted reading, riding out
//! database outages with a local retry queue and bounded reconnect
//! attempts.
//!
//! Each iteration prefers the retry queue's head over fresh buffer data,
//! so an outage's backlog drains in arrival order once the database
//! returns. Exhausting the reconnect budget is fatal for the whole
//! gateway: the worker notifies the orchestrator, which runs the normal
//! shutdown sequence.

use crate::buffer::ReadingBuffer;
use crate::db::Db;
use crate::logging::Logger;
use crate::reading::Reading;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Bounded FIFO of readings whose insert failed. Overflow drops the
/// oldest entry to admit the newest.
#[derive(Debug)]
pub(crate) struct RetryQueue {
    items: VecDeque<Reading>,
    capacity: usize,
}

impl RetryQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue at the tail; returns the dropped oldest entry when full.
    pub(crate) fn push(&mut self, reading: Reading) -> Option<Reading> {
        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(reading);
        dropped
    }

    pub(crate) fn peek(&self) -> Option<Reading> {
        self.items.front().copied()
    }

    pub(crate) fn pop(&mut self) -> Option<Reading> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Why a connect-with-retry cycle ended without a connection.
enum ConnectAbort {
    /// All attempts failed; the gateway must come down.
    Exhausted,
    /// Shutdown was signalled mid-retry.
    Interrupted,
}

/// Settings the worker needs beyond its channels.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub db_url: String,
    pub db_table: String,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub retry_queue_capacity: usize,
}

/// The storage worker. Single-threaded; owns its retry queue exclusively.
pub struct StorageWorker {
    settings: StorageSettings,
    retry: RetryQueue,
    logger: Logger,
    /// Gateway-wide stop signal (the orchestrator dropping the sending
    /// half). Polled between connect attempts and armed during backoff
    /// sleeps so a retry cycle never outlives a shutdown request.
    stop_rx: broadcast::Receiver<()>,
    /// Wakes the orchestrator when persistence is irrecoverably lost.
    fatal_tx: mpsc::Sender<()>,
}

impl StorageWorker {
    pub(crate) fn new(
        settings: StorageSettings,
        logger: Logger,
        stop_rx: broadcast::Receiver<()>,
        fatal_tx: mpsc::Sender<()>,
    ) -> Self {
        let retry = RetryQueue::new(settings.retry_queue_capacity);
        Self {
            settings,
            retry,
            logger,
            stop_rx,
            fatal_tx,
        }
    }

    /// Whether the orchestrator has requested a stop. Anything other than
    /// an empty channel counts: an explicit `()` or the sender having
    /// been dropped.
    fn stop_requested(&mut self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Run until the buffer shuts down or persistence is lost for good.
    pub(crate) async fn run(mut self, buffer: Arc<ReadingBuffer>) {
        self.logger.info("Storage manager started.");

        let mut db = match self.connect_with_retry(false).await {
            Ok(db) => db,
            Err(ConnectAbort::Interrupted) => {
                self.logger
                    .info("Storage manager terminated during initial DB connect.");
                return;
            }
            Err(ConnectAbort::Exhausted) => {
                self.escalate_fatal().await;
                return;
            }
        };

        loop {
            // Prefer the retry queue head; fall back to fresh data.
            let (reading, from_retry) = match self.retry.peek() {
                Some(reading) => (reading, true),
                None => match buffer.remove().await {
                    Ok(reading) => (reading, false),
                    Err(_) => {
                        self.logger
                            .info("Storage manager received shutdown signal from buffer.");
                        break;
                    }
                },
            };

            // Invalid-id readings are not persisted (uniform policy with
            // the analytics path).
            if !reading.is_valid_id() {
                if from_retry {
                    self.retry.pop();
                }
                debug!("dropping reading with invalid sensor id 0");
                continue;
            }

            match db.insert_reading(&reading).await {
                Ok(()) => {
                    if from_retry {
                        self.retry.pop();
                        debug!(
                            sensor_id = reading.sensor_id,
                            queued = self.retry.len(),
                            "retried reading persisted"
                        );
                    }
                }
                Err(e) => {
                    self.logger.error(format!(
                        "Failed to insert data from sensor {} into database: {e}",
                        reading.sensor_id
                    ));
                    self.logger
                        .warning("Assuming database connection lost due to insert error.");

                    if from_retry {
                        self.logger.warning(format!(
                            "Retry insert failed for sensor {}. Item remains in queue.",
                            reading.sensor_id
                        ));
                    } else if let Some(dropped) = self.retry.push(reading) {
                        self.logger.warning(format!(
                            "Retry queue full (capacity {}). Dropped oldest item (sensor {}, ts {}).",
                            self.settings.retry_queue_capacity, dropped.sensor_id, dropped.ts
                        ));
                    }

                    db.close().await;
                    db = match self.connect_with_retry(true).await {
                        Ok(db) => db,
                        Err(ConnectAbort::Interrupted) => {
                            self.logger
                                .info("Storage manager terminated during DB reconnect.");
                            return;
                        }
                        Err(ConnectAbort::Exhausted) => {
                            self.escalate_fatal().await;
                            return;
                        }
                    };
                }
            }
        }

        db.close().await;
        self.logger.info("Storage manager finished cleanup.");
    }

    /// Attempt to connect up to the configured number of times, sleeping
    /// between attempts. The sleep is interruptible by shutdown, so a
    /// retry cycle never delays termination by more than one quantum.
    async fn connect_with_retry(&mut self, reconnect: bool) -> Result<Db, ConnectAbort> {
        let attempts = self.settings.connect_attempts.max(1);
        let verb = if reconnect { "reconnect" } else { "connect" };

        for attempt in 1..=attempts {
            if self.stop_requested() {
                return Err(ConnectAbort::Interrupted);
            }
            match Db::connect(&self.settings.db_url, &self.settings.db_table).await {
                Ok(db) => {
                    self.logger.info(format!(
                        "Connection to SQL server {} established.",
                        self.settings.db_url
                    ));
                    return Ok(db);
                }
                Err(e) => {
                    self.logger.warning(format!(
                        "Failed to {verb} to SQL server (attempt {attempt}/{attempts}): {e}. \
                         Retrying in {} seconds...",
                        self.settings.connect_retry_delay.as_secs()
                    ));
                    if attempt < attempts && !self.interruptible_sleep().await {
                        return Err(ConnectAbort::Interrupted);
                    }
                }
            }
        }
        Err(ConnectAbort::Exhausted)
    }

    /// Returns `false` if the stop signal arrived before the delay
    /// elapsed.
    async fn interruptible_sleep(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.connect_retry_delay) => true,
            _ = self.stop_rx.recv() => false,
        }
    }

    async fn escalate_fatal(&self) {
        self.logger.fatal(format!(
            "Unable to connect to SQL server {} after {} attempts. Signaling gateway to exit.",
            self.settings.db_url, self.settings.connect_attempts
        ));
        let _ = self.fatal_tx.send(()).await;
    }
}
