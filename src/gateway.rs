//! The orchestrator: owns every shared handle, starts the workers in
//! dependency order, and tears the gateway down in one pass.
//!
//! Startup order matters: the pipe must exist before the sink process is
//! spawned, and the pipe's write end only opens once the sink holds the
//! read end. Shutdown is the reverse: workers are signalled and joined,
//! then the last event-log writer is dropped so the sink sees EOF, and
//! finally the sink child is reaped.

use crate::analytics::Analytics;
use crate::buffer::FanOut;
use crate::clients::ClientTable;
use crate::config::Config;
use crate::logging::{self, Logger};
use crate::roommap::RoomMap;
use crate::server::{self, IngressConfig};
use crate::storage::{StorageSettings, StorageWorker};
use crate::{admin, Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Run the gateway until the `shutdown` future completes, a worker
/// reports a fatal failure, or startup fails.
///
/// `shutdown` is typically a future resolving on SIGINT/SIGTERM. A clean
/// signal-driven shutdown returns `Ok(())`; fatal storage exhaustion and
/// startup failures return `Err`, which the binary maps to a non-zero
/// exit code.
pub async fn run(config: Config, shutdown: impl Future) -> Result<()> {
    // 1. The pipe must exist before either process opens an end of it.
    logging::create_pipe(&config.log_pipe_path)?;

    // 2. Room map is optional: a load failure costs room resolution, not
    //    the gateway. This runs before the event log exists, so problems
    //    go to the diagnostics layer.
    let map = match &config.map_file_path {
        Some(path) => match RoomMap::load(path) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), "failed to load room sensor map: {e}");
                RoomMap::empty()
            }
        },
        None => RoomMap::empty(),
    };
    let map = Arc::new(map);

    // 3. Spawn the sink, then open the pipe's write end. The open blocks
    //    until the sink opens the read end, so racing it against the
    //    child exiting converts a crashed sink into a startup error
    //    instead of a hang.
    let mut sink_child = Command::new(std::env::current_exe()?)
        .arg("--log-sink")
        .arg("--log-pipe")
        .arg(&config.log_pipe_path)
        .arg("--log-file")
        .arg(&config.log_file_path)
        .spawn()?;

    let logger = tokio::select! {
        logger = Logger::open(&config.log_pipe_path) => logger?,
        status = sink_child.wait() => {
            logging::remove_pipe(&config.log_pipe_path);
            return Err(Error::Fatal(format!(
                "log sink process exited during startup: {status:?}"
            )));
        }
    };

    logger.info(format!("Sensor gateway starting on port {}.", config.port));
    if map.is_empty() {
        logger.warning("Room sensor map is empty or missing; alerts will name sensors directly.");
    } else {
        logger.info(format!("Room sensor map loaded ({} entries).", map.len()));
    }

    // 4. Bind the sensor listener; failing here rolls the sink back.
    let tcp_listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(l) => l,
        Err(e) => {
            logger.fatal(format!(
                "Failed to bind server socket to port {}: {e}",
                config.port
            ));
            drop(logger);
            let _ = sink_child.wait().await;
            logging::remove_pipe(&config.log_pipe_path);
            return Err(e.into());
        }
    };

    // 5. Shared handles and channels.
    let fanout = FanOut::new(config.buffer_capacity);
    let table = Arc::new(ClientTable::new());
    let (notify_shutdown, _) = broadcast::channel::<()>(1);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<()>(1);

    // 6. Workers.
    let ingress_handle = {
        let fanout = fanout.clone();
        let table = Arc::clone(&table);
        let logger = logger.clone();
        let fatal_tx = fatal_tx.clone();
        let mut stop_rx = notify_shutdown.subscribe();
        let ingress_config = IngressConfig {
            idle_timeout: config.sensor_timeout,
            max_connections_per_ip: config.max_connections_per_ip,
        };
        tokio::spawn(async move {
            // Resolves when the orchestrator drops its broadcast sender.
            let shutdown = async move {
                let _ = stop_rx.recv().await;
            };
            let res =
                server::run(tcp_listener, fanout, table, logger, ingress_config, shutdown).await;
            if res.is_err() {
                let _ = fatal_tx.send(()).await;
            }
        })
    };

    let analytics_handle = {
        let analytics = Analytics::new(
            Arc::clone(&map),
            logger.clone(),
            config.too_cold_threshold,
            config.too_hot_threshold,
        );
        tokio::spawn(analytics.run(fanout.analytics_buffer()))
    };

    let storage_handle = {
        let worker = StorageWorker::new(
            StorageSettings {
                db_url: config.db_url.clone(),
                db_table: config.db_table.clone(),
                connect_attempts: config.db_connect_retry_attempts,
                connect_retry_delay: config.db_connect_retry_delay,
                retry_queue_capacity: config.retry_queue_capacity,
            },
            logger.clone(),
            notify_shutdown.subscribe(),
            fatal_tx.clone(),
        );
        tokio::spawn(worker.run(fanout.storage_buffer()))
    };

    let admin_handle = {
        let socket_path = config.admin_socket_path.clone();
        let table = Arc::clone(&table);
        let logger = logger.clone();
        let mut stop_rx = notify_shutdown.subscribe();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.recv().await;
            };
            if let Err(e) = admin::run(&socket_path, table, logger.clone(), shutdown).await {
                logger.error(format!("Command interface failed: {e}"));
            }
        })
    };

    // The orchestrator holds no spare fatal sender while waiting, so the
    // channel closing can never be mistaken for a report.
    drop(fatal_tx);

    // 7. Wait for a reason to stop.
    let mut exit: Result<()> = Ok(());
    tokio::select! {
        _ = shutdown => {
            logger.info("Shutdown signal received. Initiating shutdown...");
        }
        _ = fatal_rx.recv() => {
            logger.info("Fatal worker failure reported. Initiating shutdown...");
            exit = Err(Error::Fatal(
                "a worker reported an unrecoverable failure".to_string(),
            ));
        }
    }

    // 8. Signal everything: dropping the broadcast sender wakes every
    //    shutdown watcher; the buffers wake any blocked producer or
    //    consumer so pending readings drain.
    drop(notify_shutdown);
    fanout.signal_shutdown();

    // 9. Join workers in reverse dependency order.
    if admin_handle.await.is_err() {
        warn!("command interface task panicked");
    }
    if storage_handle.await.is_err() {
        warn!("storage manager task panicked");
    }
    if analytics_handle.await.is_err() {
        warn!("data manager task panicked");
    }
    if ingress_handle.await.is_err() {
        warn!("connection manager task panicked");
    }

    logger.info("Sensor gateway finished shutting down.");

    // 10. Close the event log (pipe EOF) and reap the sink.
    drop(logger);
    match sink_child.wait().await {
        Ok(status) => info!(%status, "log sink process exited"),
        Err(e) => warn!("failed to reap log sink process: {e}"),
    }
    logging::remove_pipe(&config.log_pipe_path);

    exit
}
