use anyhow::Result;
use clap::Parser;
use revsocks::{Agent, AgentConfig, FixedDelay};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reverse SOCKS5 agent: serves SOCKS5 through a public relay", long_about = None)]
struct Args {
    /// Relay address (host:port)
    #[arg(short, long)]
    server: String,

    /// Username for SOCKS5 clients
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 clients
    #[arg(short, long)]
    password: Option<String>,

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

    // Authentication is only enabled when both parts are non-empty
    let config = AgentConfig {
        relay_addr: args.server,
        username: args.username,
        password: args.password,
    };

    let agent = Agent::new(config)?;

    info!("Starting agent");
    agent.run(FixedDelay::default()).await
}
