//! The administrative control channel: a Unix stream socket answering
//! one-shot text queries while the gateway runs.
//!
//! Protocol: the client sends one newline-terminated command, receives one
//! response, and the connection closes. A single request is in flight at a
//! time. Every response ends with a trailing newline, error replies
//! included.

use crate::clients::ClientTable;
use crate::logging::Logger;
use crate::sysmon::{SystemMonitor, SystemSnapshot};
use crate::Result;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Longest accepted command line, including the newline.
const MAX_COMMAND_LEN: u64 = 128;

/// Run the administrative channel until the `shutdown` future completes.
/// The socket file is created on entry and removed again on the way out.
pub async fn run(
    socket_path: &Path,
    table: Arc<ClientTable>,
    logger: Logger,
    shutdown: impl Future,
) -> Result<()> {
    // A stale socket file from a previous run would make bind fail.
    remove_socket_file(socket_path)?;
    let listener = UnixListener::bind(socket_path)?;
    logger.info(format!(
        "Command interface listening on {}",
        socket_path.display()
    ));

    let mut handler = QueryHandler {
        table,
        monitor: SystemMonitor::new(),
    };
    let mut incoming = UnixListenerStream::new(listener);
    tokio::pin!(shutdown);

    loop {
        let stream = tokio::select! {
            accepted = incoming.next() => match accepted {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    warn!("admin accept failed: {e}");
                    continue;
                }
                None => break,
            },
            _ = &mut shutdown => break,
        };

        // A misbehaving admin client must not take the channel down.
        if let Err(e) = handler.serve_one(stream).await {
            warn!("admin request failed: {e}");
        }
    }

    drop(incoming);
    remove_socket_file(socket_path)?;
    logger.info("Command interface shut down.");
    Ok(())
}

/// Answers one query at a time against the live client table and the host
/// resource sampler.
struct QueryHandler {
    table: Arc<ClientTable>,
    monitor: SystemMonitor,
}

impl QueryHandler {
    async fn serve_one(&mut self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut line = String::new();
        BufReader::new(read_half.take(MAX_COMMAND_LEN))
            .read_line(&mut line)
            .await?;

        let command = line.trim();
        debug!(command, "admin command received");
        let response = self.respond(command);
        write_half.write_all(response.as_bytes()).await?;
        write_half.shutdown().await?;
        Ok(())
    }

    fn respond(&mut self, command: &str) -> String {
        match command {
            "status" => {
                let snapshot = self.monitor.sample();
                format_status(self.table.active_count(), &snapshot)
            }
            "stats" => {
                if self.table.active_count() == 0 {
                    "No active connections.\n".to_string()
                } else {
                    self.table.snapshot()
                }
            }
            other => format!("ERROR: Unknown command '{other}'. Use 'stats' or 'status'.\n"),
        }
    }
}

fn format_status(active: usize, snapshot: &SystemSnapshot) -> String {
    format!(
        "--- System Status ---\n\
         Active Connections: {}\n\
         CPU Usage: {:.2} %\n\
         RAM Usage: {:.2} % ({} / {} KB used)\n",
        active,
        snapshot.cpu_usage_percent,
        snapshot.ram_usage_percent,
        snapshot.ram_used_kb,
        snapshot.ram_total_kb,
    )
}

fn remove_socket_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
