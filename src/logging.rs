//! The gateway event log.
//!
//! Distinct from the `tracing` diagnostics layer: event-log records are a
//! product artifact. They travel through a named pipe to a dedicated sink
//! process which survives gateway death, numbers every record, and appends
//! them to the durable log file.
//!
//! Writers compose one line per record, `"YYYY-MM-DD HH:MM:SS [LEVEL]
//! message\n"`, and write it under a single process-wide mutex. Lines are
//! kept below the pipe's atomic-write limit so concurrent records never
//! interleave; over-long messages are truncated with a `...` marker.

use crate::Result;
use nix::sys::stat::Mode;
use nix::unistd;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::error;

/// Largest record written to the pipe in one call. POSIX guarantees
/// atomicity for pipe writes up to 4096 bytes on every supported target.
const MAX_LINE: usize = 4096;

/// Permissions for the pipe special file: owner and group read/write.
const PIPE_MODE: u32 = 0o660;

/// Severity of an event-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    /// Fixed-width tag so the level column lines up in the log file.
    fn tag(self) -> &'static str {
        match self {
            Level::Fatal => "[FATAL]  ",
            Level::Error => "[ERROR]  ",
            Level::Warning => "[WARNING]",
            Level::Info => "[INFO]   ",
            Level::Debug => "[DEBUG]  ",
        }
    }
}

/// Create the named pipe if it does not exist yet. Must run before the
/// sink process is spawned.
pub fn create_pipe(path: &Path) -> Result<()> {
    match unistd::mkfifo(path, Mode::from_bits_truncate(PIPE_MODE)) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove the pipe special file at orchestrator teardown.
pub fn remove_pipe(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            error!(path = %path.display(), "failed to remove log pipe: {e}");
        }
    }
}

/// Cloneable handle writing event-log records into the pipe.
///
/// Opening the write end of a FIFO blocks until a reader exists, so
/// [`Logger::open`] must run after the sink process has been spawned.
#[derive(Debug, Clone)]
pub struct Logger {
    pipe: Arc<Mutex<Option<File>>>,
}

impl Logger {
    /// Open the pipe's write end. Blocks (off the async runtime) until the
    /// sink opens the read end.
    pub async fn open(path: &Path) -> Result<Logger> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().write(true).open(&path)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(Logger {
            pipe: Arc::new(Mutex::new(Some(file))),
        })
    }

    /// A logger whose records go nowhere. Used by tests and by components
    /// after the pipe has broken.
    pub fn disabled() -> Logger {
        Logger {
            pipe: Arc::new(Mutex::new(None)),
        }
    }

    /// Write one record. Serialized by the logger mutex; a broken pipe
    /// (the sink died) closes the local end and degrades silently.
    pub fn log(&self, level: Level, message: &str) {
        let line = compose_line(level, message);

        let mut guard = self.pipe.lock().unwrap();
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                error!("event-log pipe broken, sink process is gone; logging disabled");
                *guard = None;
            } else {
                error!("event-log write failed: {e}");
            }
        }
    }

    pub fn fatal(&self, message: impl AsRef<str>) {
        self.log(Level::Fatal, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(Level::Warning, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message.as_ref());
    }
}

/// Current wall-clock time as `YYYY-MM-DD HH:MM:SS`.
pub(crate) fn timestamp() -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| String::from("0000-00-00 00:00:00"))
}

fn compose_line(level: Level, message: &str) -> String {
    let mut line = format!("{} {} {}\n", timestamp(), level.tag(), message);
    if line.len() > MAX_LINE {
        let mut cut = MAX_LINE - 4;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
        line.push_str("...\n");
    }
    line
}
