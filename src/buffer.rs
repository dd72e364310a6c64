//! Bounded reading buffers decoupling ingress from the consumers.
//!
//! [`ReadingBuffer`] is a fixed-capacity FIFO with blocking insert/remove
//! semantics and an orderly-shutdown sentinel. The state lives behind a
//! plain `std::sync::Mutex` (critical sections are tiny and never await);
//! two [`Notify`] lists play the role of the classic not-full / not-empty
//! condition variables, including spurious wake-ups, so both operations
//! re-check their predicate on every wake.
//!
//! Each downstream consumer must see every reading, so ingress writes
//! through a [`FanOut`] of two independent buffers rather than sharing one.

use crate::reading::Reading;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shutdown sentinel returned by buffer operations once
/// [`ReadingBuffer::signal_shutdown`] has taken effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("reading buffer has been shut down")
    }
}

impl std::error::Error for Closed {}

#[derive(Debug)]
struct State {
    queue: VecDeque<Reading>,
    /// Transitions only false -> true.
    shutdown: bool,
}

/// A thread-safe bounded FIFO of sensor readings.
#[derive(Debug)]
pub struct ReadingBuffer {
    capacity: usize,
    state: Mutex<State>,
    not_full: Notify,
    not_empty: Notify,
}

impl ReadingBuffer {
    /// Create a buffer holding at most `capacity` readings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be at least 1");
        Self {
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Append one reading, waiting until capacity is available.
    ///
    /// Returns [`Closed`] once shutdown has been signalled; a reading
    /// rejected this way is dropped by the caller.
    pub async fn insert(&self, reading: Reading) -> Result<(), Closed> {
        loop {
            // Register interest before checking the predicate so a wake
            // between the check and the await is not lost.
            let notified = self.not_full.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.shutdown {
                    return Err(Closed);
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(reading);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Remove the oldest reading, waiting until one is present.
    ///
    /// Pending readings are drained even after shutdown; [`Closed`] is
    /// only returned once the buffer is both shut down and empty.
    pub async fn remove(&self) -> Result<Reading, Closed> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(reading) = state.queue.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(reading);
                }
                if state.shutdown {
                    return Err(Closed);
                }
            }
            notified.await;
        }
    }

    /// Flag the buffer as shut down and wake every blocked party so it can
    /// re-evaluate. Idempotent.
    pub fn signal_shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.shutdown = true;
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The ingress-side write handle: one independent buffer per consumer, so
/// the analytics and storage paths each observe the complete stream.
#[derive(Debug, Clone)]
pub struct FanOut {
    analytics: Arc<ReadingBuffer>,
    storage: Arc<ReadingBuffer>,
}

impl FanOut {
    pub fn new(capacity: usize) -> Self {
        Self {
            analytics: Arc::new(ReadingBuffer::new(capacity)),
            storage: Arc::new(ReadingBuffer::new(capacity)),
        }
    }

    /// Insert the reading into both consumer buffers, blocking on each in
    /// turn. Fails with [`Closed`] once either buffer has shut down.
    pub async fn insert(&self, reading: Reading) -> Result<(), Closed> {
        self.analytics.insert(reading).await?;
        self.storage.insert(reading).await
    }

    pub fn analytics_buffer(&self) -> Arc<ReadingBuffer> {
        Arc::clone(&self.analytics)
    }

    pub fn storage_buffer(&self) -> Arc<ReadingBuffer> {
        Arc::clone(&self.storage)
    }

    /// Shut down both buffers. Idempotent.
    pub fn signal_shutdown(&self) {
        self.analytics.signal_shutdown();
        self.storage.signal_shutdown();
    }
}
