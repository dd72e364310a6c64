//! The gateway daemon.
//!
//! One positional argument: the TCP port to listen on. The same
//! executable doubles as the log sink process when re-invoked with the
//! hidden `--log-sink` flag; the orchestrator spawns it that way because
//! forking a threaded async runtime is not an option.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use thermogate::{config, gateway, sink, Config};
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Parser)]
#[command(name = "thermogate-server", version, author)]
/// The sensor data gateway daemon.
struct Args {
    /// TCP port to listen on for sensor connections.
    #[arg(value_parser = clap::value_parser!(u16).range(1..), required_unless_present = "log_sink")]
    port: Option<u16>,

    /// Run as the log sink process (spawned internally by the gateway).
    #[arg(long, hide = true)]
    log_sink: bool,
    #[arg(long, hide = true, default_value = config::LOG_PIPE_PATH)]
    log_pipe: PathBuf,
    #[arg(long, hide = true, default_value = config::LOG_FILE_PATH)]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    if args.log_sink {
        return sink::run(&args.log_pipe, &args.log_file)
            .await
            .context("log sink failed");
    }

    let port = args.port.context("a listening port is required")?;

    // SIGINT and SIGTERM both request an orderly shutdown.
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    };

    gateway::run(Config::new(port), shutdown)
        .await
        .context("gateway terminated abnormally")?;
    Ok(())
}
