use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdtp::config::SenderConfig;
use rdtp::sender::Sender;
use rdtp::socket;
use rdtp::stats::format_rate;

/// Send a file to a listening receiver, reliably, over UDP.
#[derive(Parser, Debug)]
#[command(name = "rdtp-send", version, about)]
struct Args {
    /// receiver host name or address
    host: String,

    /// receiver UDP port
    port: u16,

    /// file to send
    file: PathBuf,

    /// sliding window size in DATA frames
    #[arg(short = 'w', long = "window", default_value_t = 64)]
    window: usize,

    /// retransmission timeout in milliseconds
    #[arg(short = 't', long = "timeout", default_value_t = 200)]
    timeout_ms: u64,

    /// maximum payload bytes per DATA frame
    #[arg(short = 'm', long = "mss", default_value_t = 1000)]
    mss: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = SenderConfig {
        mss: args.mss,
        window: args.window,
        retransmit_timeout: Duration::from_millis(args.timeout_ms),
    };
    config.validate()?;

    let peer_addr = socket::resolve_peer(&args.host, args.port).await?;
    let udp = socket::bind_for_peer(&peer_addr).await?;
    let file = File::open(&args.file)
        .await
        .with_context(|| format!("cannot open input file {}", args.file.display()))?;

    info!("sending {} to {:?}", args.file.display(), peer_addr);
    let started = Instant::now();

    let mut sender = Sender::new(Arc::new(udp), peer_addr, BufReader::new(file), config)?;
    let stats = sender.run().await?;

    info!(
        "transfer complete: {} payload bytes, {} retransmits, {}",
        stats.payload_bytes,
        stats.retransmits,
        format_rate(stats.payload_bytes, started.elapsed())
    );
    Ok(())
}
