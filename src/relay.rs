//! Relay: the publicly reachable end of the tunnel
//!
//! Runs two subsystems side by side:
//! - the relay listener ([`listener`]) turns agent connections into pooled
//!   sessions;
//! - the public listener ([`public`]) accepts SOCKS5 clients and pipes each
//!   one through a new stream on the active session.

pub mod listener;
pub mod public;

use crate::{
    pool::{ActiveSession, DEFAULT_POOL_CAPACITY, session_pool},
    transport::RelayTls,
};
use anyhow::{Context, Result, bail};
use std::{net::SocketAddr, path::PathBuf};
use tokio::net::TcpListener;
use tracing::info;

/// RelayConfig holds everything the relay needs to start
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Public SOCKS5 listen address
    pub socks5_addr: String,
    /// Listen address for agent connections
    pub relay_addr: String,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub pool_capacity: usize,
}

impl RelayConfig {
    pub fn new(socks5_addr: impl Into<String>, relay_addr: impl Into<String>) -> Self {
        Self {
            socks5_addr: socks5_addr.into(),
            relay_addr: relay_addr.into(),
            cert_path: None,
            key_path: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }

    /// with_tls_files sets the certificate and key PEM files
    pub fn with_tls_files(mut self, cert: Option<PathBuf>, key: Option<PathBuf>) -> Self {
        self.cert_path = cert;
        self.key_path = key;
        self
    }
}

struct Listeners {
    public: TcpListener,
    relay: TcpListener,
}

/// Relay binds both listeners and runs both subsystems
pub struct Relay {
    config: RelayConfig,
    listeners: Option<Listeners>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            listeners: None,
        }
    }

    /// bind opens both listeners and returns (public, relay) addresses.
    /// Can only be called once.
    pub async fn bind(&mut self) -> Result<(SocketAddr, SocketAddr)> {
        if self.listeners.is_some() {
            bail!("relay listeners already bound");
        }

        let public = TcpListener::bind(&self.config.socks5_addr)
            .await
            .with_context(|| format!("failed to bind SOCKS5 listener on {}", self.config.socks5_addr))?;
        let relay = TcpListener::bind(&self.config.relay_addr)
            .await
            .with_context(|| format!("failed to bind relay listener on {}", self.config.relay_addr))?;

        let addrs = (public.local_addr()?, relay.local_addr()?);
        self.listeners = Some(Listeners { public, relay });
        Ok(addrs)
    }

    /// run serves until either subsystem stops, which only happens on a
    /// fatal error
    pub async fn run(mut self) -> Result<()> {
        if self.listeners.is_none() {
            self.bind().await?;
        }
        let Some(Listeners { public, relay }) = self.listeners.take() else {
            bail!("relay listeners not bound");
        };

        let tls = RelayTls::load(self.config.cert_path.as_deref(), self.config.key_path.as_deref())?;
        let (sender, pool) = session_pool(self.config.pool_capacity);

        info!(
            socks5_addr = %public.local_addr()?,
            relay_addr = %relay.local_addr()?,
            "relay started"
        );

        tokio::select! {
            r = listener::accept_agents(relay, tls, sender) => r.context("relay listener stopped"),
            r = async {
                let active = ActiveSession::start(pool).await?;
                public::serve_clients(public, active).await
            } => r.context("public listener stopped"),
        }
    }
}
