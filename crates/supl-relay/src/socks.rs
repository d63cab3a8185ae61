//! Minimal SOCKS5 client: no authentication, CONNECT only (RFC 1928).

use std::net::IpAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Error)]
pub enum SocksError {
    #[error("gateway speaks SOCKS version {0}")]
    Version(u8),

    #[error("gateway requires authentication")]
    AuthRequired,

    #[error("gateway refused CONNECT: {}", reply_text(*.0))]
    Refused(u8),

    #[error("host name '{0}' is too long for SOCKS5")]
    HostTooLong(String),

    #[error("unknown address type {0} in reply")]
    AddressType(u8),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn reply_text(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Ask the gateway on `stream` to open a tunnel to `host:port`.
///
/// IP literals are sent as addresses, anything else as a domain name so the
/// gateway does the resolution. On success the stream carries the tunnelled
/// connection.
pub async fn connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(SocksError::Version(choice[0]));
    }
    if choice[1] == METHOD_NONE_ACCEPTABLE || choice[1] != METHOD_NO_AUTH {
        return Err(SocksError::AuthRequired);
    }

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| SocksError::HostTooLong(host.to_string()))?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(SocksError::Version(head[0]));
    }
    if head[1] != 0x00 {
        return Err(SocksError::Refused(head[1]));
    }

    // Skip the bound address.
    let remaining = match head[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => return Err(SocksError::AddressType(other)),
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;
    Ok(())
}
