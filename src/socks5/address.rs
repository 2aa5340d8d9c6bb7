use crate::socks5::protocol::AddressType;
use anyhow::Result;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// read_target reads DST.ADDR and DST.PORT of a client request whose
/// ATYP byte has already been consumed and returns "host:port"
pub async fn read_target<S>(stream: &mut S, addr_type: AddressType) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    // Match type and extract address or domain name
    let host = match addr_type {
        AddressType::IPv4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            let len = stream.read_u8().await?;

            let mut domain = vec![0u8; len as usize];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain)?
        }
        AddressType::IPv6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;

            // IPv6 literals need brackets to be resolvable as host:port
            format!("[{}]", Ipv6Addr::from(addr))
        }
    };

    // Port is always 2 bytes, network order
    let port = stream.read_u16().await?;

    Ok(format!("{host}:{port}"))
}
