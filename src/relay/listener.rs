//! Relay listener: agent connections in, health-checked sessions out

use crate::{pool::PoolSender, session::Session, transport::RelayTls};
use anyhow::{Context, Result};
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

/// Limit on the TLS handshake of one agent connection
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// accept_agents upgrades each agent connection to a health-checked
/// session and pushes it into the pool. Upgrades run in their own task,
/// so the pool fills in handshake-completion order. Per-connection
/// failures are logged; a failing accept() ends the loop.
pub async fn accept_agents(listener: TcpListener, tls: RelayTls, pool: PoolSender) -> Result<()> {
    loop {
        let (tcp, remote_addr) = listener
            .accept()
            .await
            .context("failed to accept agent connection")?;

        info!(remote_addr = %remote_addr, "new relay connection");

        let tls = tls.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            let session = match upgrade(tcp, remote_addr, &tls).await {
                Ok(session) => session,
                Err(e) => {
                    error!(remote_addr = %remote_addr, "relay connection rejected: {e:#}");
                    return;
                }
            };

            // Blocks while the pool is full
            if let Err(e) = pool.push(session).await {
                error!(remote_addr = %remote_addr, "{e:#}");
            }
        });
    }
}

/// upgrade runs TLS, the session handshake and the health check
async fn upgrade(tcp: TcpStream, remote_addr: SocketAddr, tls: &RelayTls) -> Result<Session> {
    tcp.set_nodelay(true)?;

    let stream = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, tls.accept(tcp))
        .await
        .context("TLS handshake timed out")??;

    let session = Session::server(stream, remote_addr);
    let latency = session.health_check().await.context("health check failed")?;

    info!(remote_addr = %remote_addr, latency = ?latency, "session ping");
    Ok(session)
}
