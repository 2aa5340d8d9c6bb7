use crate::socks5::address::read_target;
use crate::socks5::protocol::{AddressType, Command, RSV, ReplyCode, Version};
use anyhow::{Result, anyhow, bail};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, copy_bidirectional},
    net::TcpStream,
};
use tracing::{debug, info};

// Placeholder BND.ADDR for failure replies
const UNSPECIFIED: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

/// Connect holds both legs of an established CONNECT command
pub struct Connect<S> {
    pub inbound: S,
    pub outbound: TcpStream,
    pub target: String,
}

/// Connect implementation block
impl<S> Connect<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Connect run method
    pub async fn run(mut self) -> Result<()> {
        let (from_client, from_server) =
            // Relay between streams
            copy_bidirectional(&mut self.inbound, &mut self.outbound).await?;

        info!(
            target_addr = %self.target,
            "connection closed: {} bytes from client, {} bytes from target",
            from_client, from_server
        );

        Ok(())
    }
}

/// handle_socks_request checks the incoming request for SOCKS5 version number
/// and command and returns an established CONNECT pairing
pub async fn handle_socks_request<S>(mut stream: S) -> Result<Connect<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Instantiate a request buffer & read VER, CMD, RSV, ATYP
    let mut reqbuf = [0u8; 4];
    stream.read_exact(&mut reqbuf).await?;

    let version = reqbuf[0];
    let command = reqbuf[1];
    let atyp = reqbuf[3];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5");
    }

    let Some(addr_type) = AddressType::from_byte(atyp) else {
        send_reply(&mut stream, ReplyCode::AddrTypeUnsupported, UNSPECIFIED).await?;
        bail!("[ERR] unsupported address type: {atyp:#04x}");
    };

    // The request is always read to the end so the reply lines up
    let target = read_target(&mut stream, addr_type).await?;

    match Command::from_byte(command) {
        Some(Command::Connect) => {
            let outbound = handle_connect_cmd(&mut stream, &target).await?;
            Ok(Connect {
                inbound: stream,
                outbound,
                target,
            })
        }
        // UDP datagrams cannot reach the agent through a tunneled stream
        Some(Command::Bind) | Some(Command::UdpAssociate) => {
            send_reply(&mut stream, ReplyCode::CommandNotSupported, UNSPECIFIED).await?;
            Err(anyhow!("[ERR] command {command:#04x} not supported"))
        }
        None => {
            send_reply(&mut stream, ReplyCode::CommandNotSupported, UNSPECIFIED).await?;
            Err(anyhow!("[ERR] unknown command {command:#04x}"))
        }
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect_cmd dials the requested target and reports the
/// outcome to the SOCKS client
async fn handle_connect_cmd<S>(stream: &mut S, target: &str) -> Result<TcpStream>
where
    S: AsyncWrite + Unpin,
{
    debug!(target_addr = %target, "CONNECT");

    match TcpStream::connect(target).await {
        Ok(outbound) => {
            send_reply(stream, ReplyCode::Succeeded, outbound.local_addr()?).await?;
            Ok(outbound)
        }
        Err(e) => {
            send_reply(stream, ReplyCode::from_io_error(&e), UNSPECIFIED).await?;
            Err(anyhow!("[ERR] connect to {target} failed: {e}"))
        }
    }
}

// =========
// HELPERS
// =========

/// send_reply handles logic for sending replies from the SOCKS server to
/// the client
pub(crate) async fn send_reply<S>(
    stream: &mut S,
    reply_code: ReplyCode,
    bound_addr: SocketAddr,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Build initial reply vec
    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];

    // Parse bound_addr as IPv4/6 and finish build accordingly
    match bound_addr {
        SocketAddr::V4(addr) => {
            reply.push(AddressType::IPv4 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
        SocketAddr::V6(addr) => {
            reply.push(AddressType::IPv6 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
    }

    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn udp_associate_is_refused() {
        let (mut client, server) = duplex(128);
        let task = tokio::spawn(handle_socks_request(server));

        client
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], ReplyCode::CommandNotSupported as u8);
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn unknown_address_type_is_refused() {
        let (mut client, server) = duplex(128);
        let task = tokio::spawn(handle_socks_request(server));

        client.write_all(&[0x05, 0x01, 0x00, 0x09]).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], ReplyCode::AddrTypeUnsupported as u8);
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn connect_refused_maps_reply_code() {
        // Grab a free port, then close it so the connect is refused
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut client, server) = duplex(128);
        let task = tokio::spawn(handle_socks_request(server));

        let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        req.extend_from_slice(&port.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], ReplyCode::ConnectionRefused as u8);
        assert!(task.await.unwrap().is_err());
    }
}
