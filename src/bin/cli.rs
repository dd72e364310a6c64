//! Administrative client for a running gateway.
//!
//! Sends one command over the Unix control socket, prints the response,
//! and exits.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thermogate::config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Debug, Parser)]
#[command(name = "thermogate-cli", version, author)]
/// Query a running sensor gateway.
struct Cli {
    #[clap(subcommand)]
    command: CliCommand,
    /// Path of the gateway's administrative socket.
    #[arg(long, default_value = config::ADMIN_SOCKET_PATH)]
    socket: PathBuf,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Active connection count plus host CPU and RAM usage.
    Status,
    /// One row per live sensor connection.
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let command = match cli.command {
        CliCommand::Status => "status",
        CliCommand::Stats => "stats",
    };

    let mut stream = UnixStream::connect(&cli.socket).await?;
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    print!("{response}");

    Ok(())
}
