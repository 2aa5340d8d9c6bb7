use crate::socks5::{auth::Authenticator, auth::negotiate_auth, commands::handle_socks_request};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Socks5Config lists the authentication methods the engine offers, in
/// order of preference. No entries means no authentication.
#[derive(Clone, Debug, Default)]
pub struct Socks5Config {
    pub auth_methods: Vec<Authenticator>,
}

/// Socks5Server serves the SOCKS5 protocol over already-established
/// streams. It owns no listener: callers hand it one stream per client.
#[derive(Clone, Debug)]
pub struct Socks5Server {
    config: Arc<Socks5Config>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(config: Socks5Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// serve_connection runs one full SOCKS5 session over the stream:
    /// method negotiation, optional credential check, then CONNECT
    pub async fn serve_connection<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Negotiate authentication with client
        negotiate_auth(&mut stream, &self.config.auth_methods).await?;

        // Handle connection request from client, then proxy it
        handle_socks_request(stream).await?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn serves_connect_to_echo_target() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = sock.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let (mut client, server_side) = duplex(1024);
        let server = Socks5Server::new(Socks5Config::default());
        let task = tokio::spawn(async move { server.serve_connection(server_side).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0x00]);

        let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        req.extend_from_slice(&echo_addr.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }
}
