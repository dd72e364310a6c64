//! The ingress manager: accepts sensor TCP connections and feeds parsed
//! readings into the consumer buffers.
//!
//! One task per connection. Each handler reads 10-byte frames, enforces
//! the idle timeout, keeps the shared client table current, and blocks on
//! the fan-out when the consumers fall behind. The accept loop enforces a
//! global connection cap with a semaphore and the per-IP cap through the
//! client table.

use crate::buffer::FanOut;
use crate::clients::{ClientTable, SensorIdChange};
use crate::connection::FrameReader;
use crate::logging::Logger;
use crate::reading::Reading;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Maximum number of concurrent sensor connections across all peers.
/// When the limit is reached, the listener stops accepting until an
/// active connection terminates.
pub const MAX_CLIENTS: usize = 100;

/// Ingress tunables, taken from the gateway [`crate::Config`].
#[derive(Debug, Clone, Copy)]
pub struct IngressConfig {
    /// Close a connection that produces no complete frame for this long.
    pub idle_timeout: Duration,
    /// Reject connections beyond this many live records per peer IP.
    pub max_connections_per_ip: usize,
}

/// Ingress listener state. Accepts connections and spawns a [`Handler`]
/// task for each.
struct Listener {
    listener: TcpListener,
    fanout: FanOut,
    table: Arc<ClientTable>,
    logger: Logger,
    config: IngressConfig,
    /// Bounds the number of live handler tasks.
    limit_connections: Arc<Semaphore>,
    /// Subscribed by every handler; dropped at drain time to wake them
    /// all.
    notify_shutdown: broadcast::Sender<()>,
    /// Cloned into every handler; `run` awaits the channel closing to
    /// know all handlers finished.
    shutdown_complete_tx: mpsc::Sender<()>,
}

/// Per-connection handler. Parses frames from one sensor socket and
/// pushes the resulting readings into the fan-out.
struct Handler {
    connection: FrameReader<TcpStream>,
    fanout: FanOut,
    table: Arc<ClientTable>,
    token: u64,
    logger: Logger,
    idle_timeout: Duration,
    /// Fires once the ingress manager starts draining connections; the
    /// sending half being dropped is the signal.
    drain: broadcast::Receiver<()>,
    _shutdown_complete: mpsc::Sender<()>,
}

/// Run the ingress manager.
///
/// Accepts connections from `listener` until the `shutdown` future
/// completes, then drains: every per-connection handler is woken and the
/// call returns once all of them have finished. Returns `Err` only when
/// accepting failed repeatedly and the backoff budget is spent; the
/// orchestrator treats that as reason to bring the whole gateway down.
pub async fn run(
    listener: TcpListener,
    fanout: FanOut,
    table: Arc<ClientTable>,
    logger: Logger,
    config: IngressConfig,
    shutdown: impl Future,
) -> Result<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let mut server = Listener {
        listener,
        fanout,
        table,
        logger: logger.clone(),
        config,
        limit_connections: Arc::new(Semaphore::new(MAX_CLIENTS)),
        notify_shutdown,
        shutdown_complete_tx,
    };

    let mut result = Ok(());
    tokio::select! {
        res = server.run() => {
            // Accepting failed too many times; individual connection
            // errors never bubble up to here.
            if let Err(err) = res {
                logger.fatal(format!("Connection manager failed to accept: {err}"));
                result = Err(err);
            }
        }
        _ = shutdown => {
            logger.info("Connection manager shutting down...");
        }
    }

    // Wake every handler and wait for the last one to drop its sender.
    let Listener {
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;
    drop(notify_shutdown);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;

    logger.info("Connection manager finished cleanup.");
    result
}

impl Listener {
    async fn run(&mut self) -> Result<()> {
        self.logger.info(format!(
            "Server socket listening on port {}",
            self.listener.local_addr()?.port()
        ));

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .expect("connection semaphore never closes");

            let socket = self.accept().await?;

            let peer = match socket.peer_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("could not read peer address of accepted socket: {e}");
                    continue;
                }
            };

            let Some(token) = self
                .table
                .try_register(peer, self.config.max_connections_per_ip)
            else {
                self.logger.warning(format!(
                    "Connection limit ({}) reached for IP {}. Rejecting new connection.",
                    self.config.max_connections_per_ip,
                    peer.ip()
                ));
                continue;
            };

            self.logger.info(format!(
                "New connection accepted from {}:{} ({} from this IP).",
                peer.ip(),
                peer.port(),
                self.table.connections_from(&peer)
            ));

            let mut handler = Handler {
                connection: FrameReader::new(socket),
                fanout: self.fanout.clone(),
                table: Arc::clone(&self.table),
                token,
                logger: self.logger.clone(),
                idle_timeout: self.config.idle_timeout,
                drain: self.notify_shutdown.subscribe(),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                match handler.run().await {
                    Ok(()) => {}
                    Err(Error::TruncatedFrame) => handler.logger.warning(
                        "Received partial frame from sensor connection. Closing connection.",
                    ),
                    Err(err) => handler
                        .logger
                        .error(format!("Read error on sensor connection: {err}. Closing connection.")),
                }
                handler.table.remove(handler.token);
                drop(permit);
            });
        }
    }

    /// Accept one connection, retrying transient failures with
    /// exponential backoff (1 s doubling up to 64 s) before giving up.
    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => {
                    debug!("inbound connection accepted");
                    return Ok(socket);
                }
                Err(err) => {
                    if backoff > 64 {
                        error!(%err, "failed to accept inbound connection too many times");
                        return Err(err.into());
                    }
                    warn!(%err, "accept failed, retrying in {backoff} seconds");
                }
            }
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Handler {
    /// Process one sensor connection until the peer goes away, a frame is
    /// malformed, the idle timeout fires, or the ingress manager starts
    /// draining.
    async fn run(&mut self) -> Result<()> {
        loop {
            // Only one drain notice is ever observed (a `()` send or the
            // sender dropping, whichever comes first), so the receiver is
            // awaited directly; there is no lag to account for.
            let read_result = tokio::select! {
                res = timeout(self.idle_timeout, self.connection.read_frame()) => res,
                _ = self.drain.recv() => return Ok(()),
            };

            let frame = match read_result {
                // No complete frame within the idle window.
                Err(_elapsed) => {
                    match self.table.sensor_id(self.token) {
                        Some(id) => self
                            .logger
                            .info(format!("Sensor node {id} timed out. Closing connection.")),
                        None => self.logger.info(
                            "Client timed out before sending an ID. Closing connection.",
                        ),
                    }
                    return Ok(());
                }
                Ok(res) => match res? {
                    Some(frame) => frame,
                    // Clean EOF on a frame boundary.
                    None => {
                        match self.table.sensor_id(self.token) {
                            Some(id) => self
                                .logger
                                .info(format!("Sensor node {id} has closed the connection.")),
                            None => self
                                .logger
                                .info("Connection closed by client before sending an ID."),
                        }
                        return Ok(());
                    }
                },
            };

            match self.table.observe_sensor(self.token, frame.sensor_id) {
                SensorIdChange::First => self.logger.info(format!(
                    "Sensor node {} has opened a new connection.",
                    frame.sensor_id
                )),
                SensorIdChange::Changed(old) => self.logger.warning(format!(
                    "Sensor ID changed on an open connection from {} to {}.",
                    old, frame.sensor_id
                )),
                SensorIdChange::Same => {}
            }
            // Only successfully parsed frames count as activity.
            self.table.touch(self.token);

            let reading = Reading::now(frame.sensor_id, frame.value);
            if self.fanout.insert(reading).await.is_err() {
                // Buffers are closed: the gateway is coming down.
                return Ok(());
            }
        }
    }
}
