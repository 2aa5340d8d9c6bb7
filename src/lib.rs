//! A reverse SOCKS5 tunnel
//!
//! Exposes a SOCKS5 proxy that lives behind NAT or a firewall:
//!
//! - the **agent** dials out to a public **relay** over TLS and becomes the
//!   initiating side of a yamux session;
//! - the **relay** pools agent sessions, keeps one of them active and opens
//!   a new stream on it for every client of its public SOCKS5 port;
//! - the agent serves SOCKS5 on each stream and dials the real targets.
//!
//! ```text
//! SOCKS5 client ──tcp──▶ relay ══ TLS + yamux ══ agent ──tcp──▶ target
//! ```
//!
//! # Example
//! ```no_run
//! use revsocks::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let relay = Relay::new(RelayConfig::new("0.0.0.0:1080", "0.0.0.0:8443"));
//!     relay.run().await
//! }
//! ```

pub mod agent;
pub mod pool;
pub mod proxy;
pub mod relay;
pub mod retry;
pub mod session;
pub mod socks5;
pub mod transport;

// Re-export main types at crate root for convenience
pub use agent::{Agent, AgentConfig};
pub use relay::{Relay, RelayConfig};
pub use retry::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use session::Session;
