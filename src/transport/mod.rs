//! Transport layer implementations
//!
//! Provides the [`Socket`] abstraction and its two variants:
//! - [`PlainSocket`]: raw TCP, optionally through SOCKS5 / HTTP CONNECT
//! - [`FakeTlsSocket`]: TCP framed to look like a TLS 1.3 session
//!
//! Use [`create_socket`] to pick the right one for a connection secret.

mod diagnostics;
mod factory;
mod link;
mod plain;
mod tls;

pub use diagnostics::{classify, Diagnostics, ErrorClass, TracingDiagnostics};
pub use factory::create_socket;
pub use link::RawState;
pub use plain::PlainSocket;
pub use tls::{FakeTlsSocket, TlsState};

use crate::protocol::ProtocolError;
use crate::proxy::ProxyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Notifications produced by a socket, in transport order
#[derive(Debug)]
pub enum SocketEvent {
    /// The socket is ready for application data
    Connected,
    /// The peer closed the connection
    Disconnected,
    /// Application bytes can be read
    ReadyRead,
    /// The socket failed and must be discarded
    Error(TransportError),
    /// The local clock may be skewed; resync unixtime before retrying
    SyncTimeRequest,
}

/// Concrete socket variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Plain,
    FakeTls,
}

impl SocketKind {
    /// Suffix used to tag log lines with the transport in use
    pub fn debug_postfix(&self) -> &'static str {
        match self {
            SocketKind::Plain => "",
            SocketKind::FakeTls => "_ee",
        }
    }
}

/// One connection attempt to a server
///
/// Instances are never reused: after `Disconnected` or `Error` the caller
/// drops the socket and builds a new one. Dropping a socket tears down its
/// transport without producing further events.
#[async_trait]
pub trait Socket: Send {
    /// Start connecting; completion is reported through [`Socket::next_event`]
    fn connect_to_host(&mut self, address: &str, port: u16);

    /// Whether application data can flow
    fn is_connected(&self) -> bool;

    /// Whether [`Socket::read`] would return at least one byte
    fn has_bytes_available(&self) -> bool;

    /// Copy available application bytes into `buffer` without blocking
    fn read(&mut self, buffer: &mut [u8]) -> usize;

    /// Send `prefix` followed by `buffer`
    fn write(&mut self, prefix: &[u8], buffer: &[u8]);

    /// Diagnostic snapshot of the underlying TCP state
    fn debug_state(&self) -> i32;

    fn kind(&self) -> SocketKind;

    /// Whether an obfuscation start nonce is safe to use on this transport
    fn is_good_start_nonce(&self, nonce: &[u8]) -> bool;

    /// Notify the socket that the layer above gave up waiting on it
    fn timed_out(&mut self);

    /// Wait for the next event; `None` once the socket is finished
    async fn next_event(&mut self) -> Option<SocketEvent>;
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection timeout in seconds, proxy negotiation included
    pub connect_timeout: u64,
    /// Size of a single read from the TCP stream
    pub read_chunk_size: usize,
    /// SO_SNDBUF override
    pub send_buffer_size: Option<u32>,
    /// SO_RCVBUF override
    pub recv_buffer_size: Option<u32>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

/// Socket buffer size used for media transfers
pub const FILES_BUFFER_SIZE: u32 = 2 * 1024 * 1024;

impl TransportConfig {
    /// Profile for connections that carry file uploads and downloads
    pub fn for_files() -> Self {
        Self {
            send_buffer_size: Some(FILES_BUFFER_SIZE),
            recv_buffer_size: Some(FILES_BUFFER_SIZE),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_chunk_size: 64 * 1024,
            send_buffer_size: None,
            recv_buffer_size: None,
            nodelay: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_profile() {
        let config = TransportConfig::for_files();
        assert_eq!(config.send_buffer_size, Some(FILES_BUFFER_SIZE));
        assert_eq!(config.recv_buffer_size, Some(FILES_BUFFER_SIZE));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.nodelay);
    }

    #[test]
    fn test_debug_postfix() {
        assert_eq!(SocketKind::Plain.debug_postfix(), "");
        assert_eq!(SocketKind::FakeTls.debug_postfix(), "_ee");
    }
}
