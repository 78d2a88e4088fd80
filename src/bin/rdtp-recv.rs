use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdtp::receiver::Receiver;
use rdtp::socket;
use rdtp::stats::format_rate;

/// Receive a file from a sender, reliably, over UDP.
#[derive(Parser, Debug)]
#[command(name = "rdtp-recv", version, about)]
struct Args {
    /// UDP port to listen on
    port: u16,

    /// output file (created or truncated)
    output_file: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let udp = socket::bind_listener(args.port).await?;
    let file = File::create(&args.output_file)
        .await
        .with_context(|| format!("cannot open output file {}", args.output_file.display()))?;

    info!("listening on port {}", args.port);
    let started = Instant::now();

    let mut receiver = Receiver::new(Arc::new(udp), BufWriter::new(file));
    let stats = receiver.run().await?;

    info!(
        "transfer complete: {} bytes written, {}",
        stats.bytes_written,
        format_rate(stats.bytes_written, started.elapsed())
    );
    Ok(())
}
