use anyhow::Result;
use clap::Parser;
use revsocks::{Relay, RelayConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reverse SOCKS5 relay: public SOCKS5 port backed by agent tunnels", long_about = None)]
struct Args {
    /// Public SOCKS5 listen address
    #[arg(long)]
    socks5: String,

    /// Listen address for agent (TLS) connections
    #[arg(long)]
    tls: String,

    /// TLS certificate file (PEM); the built-in certificate is used when unusable
    #[arg(long)]
    cert: Option<PathBuf>,

    /// TLS private key file (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = RelayConfig::new(args.socks5, args.tls).with_tls_files(args.cert, args.key);

    // Run until a listener fails
    Relay::new(config).run().await
}
