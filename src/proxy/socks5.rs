//! SOCKS5 client handshake (RFC 1928, RFC 1929)

use super::{Address, ProxyError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SOCKS5 version
const SOCKS_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version
const AUTH_VERSION: u8 = 0x01;

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AuthMethod {
    NoAuth = 0x00,
    UsernamePassword = 0x02,
    NoAcceptable = 0xFF,
}

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    Connect = 0x01,
}

/// Address types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AddressType {
    Ipv4 = 0x01,
    Domain = 0x03,
    Ipv6 = 0x04,
}

/// Map a non-zero reply code to an error
fn reply_error(code: u8) -> ProxyError {
    match code {
        0x02 => ProxyError::ConnectionNotAllowed,
        0x03 => ProxyError::NetworkUnreachable,
        0x04 => ProxyError::HostUnreachable,
        0x05 => ProxyError::ConnectionRefused,
        0x06 => ProxyError::TtlExpired,
        0x07 => ProxyError::CommandNotSupported,
        0x08 => ProxyError::UnsupportedAddressType(code),
        _ => ProxyError::GeneralFailure(format!("SOCKS5 reply {:#04x}", code)),
    }
}

fn encode_request(target: &Address) -> Result<Vec<u8>, ProxyError> {
    let mut buf = vec![SOCKS_VERSION, Command::Connect as u8, 0x00];

    match target {
        Address::Ipv4(ip, port) => {
            buf.push(AddressType::Ipv4 as u8);
            buf.extend_from_slice(ip);
            buf.extend_from_slice(&port.to_be_bytes());
        }
        Address::Ipv6(ip, port) => {
            buf.push(AddressType::Ipv6 as u8);
            buf.extend_from_slice(ip);
            buf.extend_from_slice(&port.to_be_bytes());
        }
        Address::Domain(domain, port) => {
            if domain.is_empty() || domain.len() > 255 {
                return Err(ProxyError::InvalidAddress(domain.clone()));
            }
            buf.push(AddressType::Domain as u8);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
        }
    }

    Ok(buf)
}

/// Ask the proxy on `stream` to CONNECT to `target`
pub(super) async fn connect(
    stream: &mut TcpStream,
    target: &Address,
    credentials: Option<(&str, &str)>,
) -> Result<(), ProxyError> {
    // Greeting
    let greeting: &[u8] = if credentials.is_some() {
        &[
            SOCKS_VERSION,
            0x02,
            AuthMethod::NoAuth as u8,
            AuthMethod::UsernamePassword as u8,
        ]
    } else {
        &[SOCKS_VERSION, 0x01, AuthMethod::NoAuth as u8]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(choice[0]));
    }

    match choice[1] {
        m if m == AuthMethod::NoAuth as u8 => {}
        m if m == AuthMethod::UsernamePassword as u8 => {
            let (user, password) = credentials.ok_or(ProxyError::NoAcceptableAuthMethod)?;
            if user.len() > 255 || password.len() > 255 {
                return Err(ProxyError::AuthenticationFailed);
            }
            let mut auth = Vec::with_capacity(3 + user.len() + password.len());
            auth.push(AUTH_VERSION);
            auth.push(user.len() as u8);
            auth.extend_from_slice(user.as_bytes());
            auth.push(password.len() as u8);
            auth.extend_from_slice(password.as_bytes());
            stream.write_all(&auth).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(ProxyError::AuthenticationFailed);
            }
        }
        m if m == AuthMethod::NoAcceptable as u8 => {
            return Err(ProxyError::NoAcceptableAuthMethod);
        }
        _ => return Err(ProxyError::NoAcceptableAuthMethod),
    }

    // Request
    stream.write_all(&encode_request(target)?).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(reply[0]));
    }
    if reply[1] != 0x00 {
        return Err(reply_error(reply[1]));
    }

    // Skip the bound address
    let skip = match reply[3] {
        t if t == AddressType::Ipv4 as u8 => 4,
        t if t == AddressType::Ipv6 as u8 => 16,
        t if t == AddressType::Domain as u8 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        t => return Err(ProxyError::UnsupportedAddressType(t)),
    };
    let mut bound = vec![0u8; skip + 2];
    stream.read_exact(&mut bound).await?;

    debug!("SOCKS5 tunnel established to {}", target);
    Ok(())
}
