//! Sensor-node simulator.
//!
//! Streams wire frames for one sensor id at a fixed interval, the way a
//! real node would. Temperatures follow a small deterministic wave around
//! the base value so alert thresholds can be exercised on purpose.

use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;
use thermogate::connection::encode_frame;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "thermogate-sensor", version, author)]
/// Simulate one temperature sensor node.
struct Args {
    /// Gateway port to connect to.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
    /// Sensor id to report (0 is the reserved invalid id).
    #[arg(long)]
    id: u16,
    /// Gateway host.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,
    /// Base temperature in degrees.
    #[arg(long, default_value_t = 20.0)]
    base: f64,
    /// Milliseconds between frames.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Stop after this many frames; runs until interrupted if omitted.
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let addr = std::net::SocketAddr::new(args.host, args.port);
    let mut stream = TcpStream::connect(addr).await?;
    info!(%addr, id = args.id, "connected to gateway");

    let mut sent: u64 = 0;
    loop {
        if let Some(count) = args.count {
            if sent >= count {
                break;
            }
        }

        // Triangle wave, +/- 1.5 degrees over an 8-frame period.
        let phase = (sent % 8) as f64;
        let offset = if phase < 4.0 { phase } else { 8.0 - phase };
        let value = args.base + (offset - 2.0) * 0.75;

        let frame = encode_frame(args.id, value);
        tokio::select! {
            res = stream.write_all(&frame) => res?,
            _ = tokio::signal::ctrl_c() => break,
        }
        sent += 1;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(args.interval_ms)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stream.shutdown().await?;
    info!(frames = sent, "simulator finished");
    Ok(())
}
