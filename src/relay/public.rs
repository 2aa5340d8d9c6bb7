//! Public listener: plain SOCKS5 clients, each paired with a new stream on
//! the active session

use crate::{pool::ActiveSession, proxy::pipe, session::Session};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// serve_clients accepts public SOCKS5 clients and hands each one the
/// session active at the moment it was accepted
pub async fn serve_clients(listener: TcpListener, active: ActiveSession) -> Result<()> {
    loop {
        let (client, peer_addr) = listener
            .accept()
            .await
            .context("failed to accept public connection")?;

        let session = active.current();
        tokio::spawn(handle_client(client, peer_addr, session));
    }
}

/// handle_client pairs one public client with a fresh stream. The
/// client is dropped (closed) when no live session is available.
async fn handle_client(client: TcpStream, peer_addr: SocketAddr, session: Session) {
    if session.is_closed() {
        warn!(peer_addr = %peer_addr, "closing connection because no session available");
        return;
    }

    info!(peer_addr = %peer_addr, remote_addr = %session.remote_addr(), "new proxy connection");

    let stream = match session.open_stream().await {
        Ok(stream) => stream,
        Err(e) => {
            error!(peer_addr = %peer_addr, "{e:#}");
            return;
        }
    };

    let stats = pipe(client, stream).await;
    debug!(
        peer_addr = %peer_addr,
        "proxy connection closed: {} bytes from client, {} bytes from agent",
        stats.a_to_b, stats.b_to_a
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DEFAULT_POOL_CAPACITY, session_pool, tests::session_pair};
    use crate::session::Stream;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    /// tag_agent answers every stream with `tag` and then echoes
    fn tag_agent(agent: Session, tag: &'static [u8]) {
        tokio::spawn(async move {
            while let Ok(stream) = agent.accept_stream().await {
                tokio::spawn(tag_then_echo(stream, tag));
            }
        });
    }

    async fn tag_then_echo(mut stream: Stream, tag: &[u8]) -> std::io::Result<()> {
        stream.write_all(tag).await?;
        stream.flush().await?;
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            stream.write_all(&buf[..n]).await?;
            stream.flush().await?;
        }
    }

    async fn serve(active: ActiveSession) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_clients(listener, active));
        addr
    }

    /// hello writes one byte, since a stream only reaches the agent with
    /// its first data, and returns the agent's tag followed by the echo
    async fn hello(client: &mut TcpStream) -> [u8; 2] {
        client.write_all(b"x").await.unwrap();
        let mut reply = [0u8; 2];
        timeout(Duration::from_secs(5), client.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        reply
    }

    #[tokio::test]
    async fn clients_are_piped_through_the_active_session() {
        let (sender, pool) = session_pool(DEFAULT_POOL_CAPACITY);
        let (a, a_agent) = session_pair(1);
        tag_agent(a_agent, b"A");
        sender.push(a).await.unwrap();

        let addr = serve(ActiveSession::start(pool).await.unwrap()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(&hello(&mut client).await, b"Ax");

        client.write_all(b"echo me").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo me");
    }

    #[tokio::test]
    async fn new_clients_use_the_replacement_session() {
        let (sender, pool) = session_pool(DEFAULT_POOL_CAPACITY);
        let (a, a_agent) = session_pair(1);
        let (b, b_agent) = session_pair(2);
        tag_agent(a_agent.clone(), b"A");
        tag_agent(b_agent, b"B");
        let a_relay = a.clone();
        sender.push(a).await.unwrap();
        sender.push(b).await.unwrap();

        let mut active = ActiveSession::start(pool).await.unwrap();
        let addr = serve(active.clone()).await;

        let mut before = TcpStream::connect(addr).await.unwrap();
        assert_eq!(&hello(&mut before).await, b"Ax");

        a_agent.close();
        a_relay.closed().await;
        let installed = timeout(Duration::from_secs(5), active.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(installed.remote_addr().port(), 2);

        let mut after = TcpStream::connect(addr).await.unwrap();
        assert_eq!(&hello(&mut after).await, b"Bx");

        // The pairing on the dead session was torn down with it
        let mut buf = [0u8; 1];
        let gone = timeout(Duration::from_secs(5), before.read(&mut buf)).await.unwrap();
        assert!(matches!(gone, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn client_is_closed_while_no_session_is_live() {
        let (sender, pool) = session_pool(DEFAULT_POOL_CAPACITY);
        let (a, a_agent) = session_pair(1);
        tag_agent(a_agent.clone(), b"A");
        let a_relay = a.clone();
        sender.push(a).await.unwrap();

        let addr = serve(ActiveSession::start(pool).await.unwrap()).await;

        a_agent.close();
        a_relay.closed().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), client.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}
