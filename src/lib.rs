//! # mtproto-socket
//!
//! Client-side transport sockets for a messaging protocol that must survive
//! protocol-based blocking.
//!
//! ## Features
//!
//! - **Plain TCP** transport, optionally routed through SOCKS5 or HTTP CONNECT
//! - **Fake-TLS** transport that frames all traffic as a TLS 1.3 session
//! - **Staged ServerHello validation** with an HMAC-SHA256 digest over the greeting
//! - **Factory** selecting the transport from the connection secret
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  RPC dispatch layer                  │
//! │           (read / write raw obfuscated bytes)        │
//! ├─────────────────────────────────────────────────────┤
//! │                  Socket (trait)                      │
//! │        PlainSocket            FakeTlsSocket          │
//! │                         (hello, record framing)      │
//! ├─────────────────────────────────────────────────────┤
//! │                  Link driver task                    │
//! │      (connect, proxy negotiation, TCP read/write)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each socket owns one driver task on the runtime it was created for. The
//! socket and the task only talk through channels; all state-machine work runs
//! on the owner inside [`transport::Socket::next_event`], `read` and `write`.

pub mod buffer;
pub mod config;
pub mod crypto;
pub mod obfuscation;
pub mod protocol;
pub mod proxy;
pub mod secret;
pub mod transport;
pub mod unixtime;

pub use config::Config;
pub use proxy::{ProxyData, ProxyType};
pub use secret::Secret;
pub use transport::{create_socket, Socket, SocketEvent, SocketKind, TransportConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
