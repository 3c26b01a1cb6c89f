//! Proxy configuration and client-side negotiation
//!
//! Provides:
//! - [`ProxyData`], the caller-owned proxy descriptor
//! - SOCKS5 client handshake (RFC 1928 / RFC 1929)
//! - HTTP CONNECT client handshake
//!
//! MTProto proxies are not negotiated here: they are ordinary endpoints that
//! the socket dials directly, keyed by the secret in their password field.

#[cfg(feature = "socks5")]
mod socks5;

#[cfg(feature = "http-proxy")]
mod http;

use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::net::TcpStream;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SOCKS version: {0}")]
    InvalidSocksVersion(u8),

    #[error("No acceptable authentication method")]
    NoAcceptableAuthMethod,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Connection not allowed by ruleset")]
    ConnectionNotAllowed,

    #[error("Host unreachable")]
    HostUnreachable,

    #[error("Network unreachable")]
    NetworkUnreachable,

    #[error("TTL expired")]
    TtlExpired,

    #[error("Command not supported")]
    CommandNotSupported,

    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    #[error("HTTP proxy answered {0}")]
    HttpStatus(u16),

    #[error("Invalid proxy response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Proxy type {0:?} not compiled in")]
    Unsupported(ProxyType),

    #[error("General failure: {0}")]
    GeneralFailure(String),
}

/// Kind of proxy a connection goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    None,
    Socks5,
    Http,
    Mtproto,
}

/// Proxy descriptor supplied by the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyData {
    #[serde(rename = "type", default)]
    pub kind: ProxyType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    /// Password, or the textual secret for MTProto proxies
    #[serde(default)]
    pub password: String,
}

impl ProxyData {
    /// No proxy
    pub fn none() -> Self {
        Self::default()
    }

    /// SOCKS5 proxy without credentials
    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyType::Socks5,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// HTTP CONNECT proxy without credentials
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyType::Http,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// MTProto proxy keyed by a textual secret
    pub fn mtproto(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            kind: ProxyType::Mtproto,
            host: host.into(),
            port,
            password: secret.into(),
            ..Self::default()
        }
    }

    /// Attach username/password credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Secret derived from an MTProto proxy's password
    ///
    /// Empty for every other proxy type and for unparsable passwords.
    pub fn secret_from_mtproto_password(&self) -> Secret {
        if self.kind != ProxyType::Mtproto {
            return Secret::default();
        }
        Secret::parse(&self.password)
    }

    /// Whether this descriptor is complete enough to be used
    pub fn valid(&self) -> bool {
        match self.kind {
            ProxyType::None => true,
            ProxyType::Mtproto => {
                let secret = self.secret_from_mtproto_password();
                !self.host.is_empty() && self.port != 0 && !secret.is_empty() && secret.validate()
            }
            ProxyType::Socks5 | ProxyType::Http => !self.host.is_empty() && self.port != 0,
        }
    }

    /// Whether the TCP stream is tunneled through the proxy to the target
    pub fn tunnels(&self) -> bool {
        matches!(self.kind, ProxyType::Socks5 | ProxyType::Http)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() && self.password.is_empty() {
            None
        } else {
            Some((&self.user, &self.password))
        }
    }
}

/// Proxy target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address and port
    Ipv4([u8; 4], u16),
    /// IPv6 address and port
    Ipv6([u8; 16], u16),
    /// Domain name and port
    Domain(String, u16),
}

impl Address {
    /// Build from a host string, recognising literal IPs
    pub fn new(host: &str, port: u16) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<Ipv4Addr>() {
            Address::Ipv4(ip.octets(), port)
        } else if let Ok(ip) = bare.parse::<Ipv6Addr>() {
            Address::Ipv6(ip.octets(), port)
        } else {
            Address::Domain(host.to_string(), port)
        }
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) => *port,
            Address::Ipv6(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", Ipv4Addr::from(*ip), port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", Ipv6Addr::from(*ip), port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Negotiate a tunnel to `target` over a stream already connected to the proxy
///
/// A no-op for proxies that do not tunnel.
pub async fn negotiate(
    proxy: &ProxyData,
    stream: &mut TcpStream,
    target: &Address,
) -> Result<(), ProxyError> {
    match proxy.kind {
        ProxyType::None | ProxyType::Mtproto => Ok(()),
        #[cfg(feature = "socks5")]
        ProxyType::Socks5 => socks5::connect(stream, target, proxy.credentials()).await,
        #[cfg(feature = "http-proxy")]
        ProxyType::Http => http::connect(stream, target, proxy.credentials()).await,
        #[allow(unreachable_patterns)]
        kind => Err(ProxyError::Unsupported(kind)),
    }
}
