//! The log sink: a separate process that drains the event-log pipe into
//! the durable log file.
//!
//! Running outside the gateway process means records the OS has already
//! delivered to the pipe survive a gateway crash, and log-file I/O never
//! competes for the gateway's critical sections. The sink exits when the
//! pipe's write end closes (gateway shutdown or death) and re-opens the
//! log file on `SIGHUP` so logrotate can move it aside.

use crate::logging::timestamp;
use crate::Result;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Bytes pulled from the pipe per read call.
const READ_CHUNK: usize = 512;

/// Upper bound on a partially assembled record. Producers keep lines under
/// the pipe's atomic-write limit, so hitting this means corrupted input;
/// the buffer is reported and reset rather than killing the sink.
const ASSEMBLY_CAPACITY: usize = READ_CHUNK * 4;

/// Run the sink until the pipe reaches end of file.
///
/// Blocks (off the runtime) while opening the pipe's read end; the FIFO
/// open is the rendezvous with the gateway opening the write end.
pub async fn run(pipe_path: &Path, log_file_path: &Path) -> Result<()> {
    let pipe_file = {
        let path = pipe_path.to_path_buf();
        tokio::task::spawn_blocking(move || std::fs::File::open(&path))
            .await
            .map_err(io::Error::other)??
    };
    let mut reader = pipe::Receiver::from_file(pipe_file)?;

    let mut log_file = open_log_file(log_file_path).await?;
    let mut sighup = signal(SignalKind::hangup())?;

    let mut sequence: u64 = 1;
    let mut assembly: Vec<u8> = Vec::with_capacity(ASSEMBLY_CAPACITY);
    let mut chunk = [0u8; READ_CHUNK];

    write_record(&mut log_file, 0, "Log process started.").await?;
    info!(pipe = %pipe_path.display(), file = %log_file_path.display(), "log sink running");

    loop {
        let bytes_read = tokio::select! {
            res = reader.read(&mut chunk) => res?,
            _ = sighup.recv() => {
                info!("SIGHUP received, re-opening log file");
                log_file.flush().await?;
                log_file = open_log_file(log_file_path).await?;
                continue;
            }
        };

        if bytes_read == 0 {
            // Write end closed: flush whatever is left and finish.
            break;
        }

        if assembly.len() + bytes_read > ASSEMBLY_CAPACITY {
            warn!("assembly buffer overflow, discarding buffered bytes");
            write_record(&mut log_file, 0, "Log sink ERROR: assembly buffer overflow.").await?;
            assembly.clear();
            continue;
        }
        assembly.extend_from_slice(&chunk[..bytes_read]);

        // Emit every complete line accumulated so far.
        while let Some(pos) = assembly.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = assembly.drain(..=pos).collect();
            let payload = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            write_record(&mut log_file, sequence, &payload).await?;
            sequence += 1;
        }
    }

    if !assembly.is_empty() {
        warn!("flushing partial record left in the pipe at close");
        let payload = format!("{} [PARTIAL/EOF]", String::from_utf8_lossy(&assembly));
        write_record(&mut log_file, sequence, &payload).await?;
        sequence += 1;
    }

    write_record(&mut log_file, sequence, "Log process finished.").await?;
    log_file.flush().await?;
    info!("log sink finished");
    Ok(())
}

async fn open_log_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Append one `<sequence> <timestamp> <payload>` record and flush so the
/// file is current even if the sink is killed next.
async fn write_record(file: &mut File, sequence: u64, payload: &str) -> Result<()> {
    let line = format!("{} {} {}\n", sequence, timestamp(), payload);
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
