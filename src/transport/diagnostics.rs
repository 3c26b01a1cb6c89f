//! Transport error classification and reporting
//!
//! [`classify`] is a pure mapping from an error to a coarse class; sockets
//! hand the result to an injected [`Diagnostics`] sink. The class only picks
//! a log severity, every error still ends the socket the same way.

use super::TransportError;
use std::io::ErrorKind;
use tracing::{debug, warn, Level};

/// Coarse error category for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ConnectionRefused,
    RemoteClosed,
    HostNotFound,
    Timeout,
    Network,
    Proxy,
    Protocol,
    Other,
}

impl ErrorClass {
    /// Severity the error is logged at
    pub fn level(&self) -> Level {
        match self {
            ErrorClass::RemoteClosed => Level::DEBUG,
            _ => Level::WARN,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ErrorClass::ConnectionRefused => "socket connection refused",
            ErrorClass::RemoteClosed => "remote host closed socket connection",
            ErrorClass::HostNotFound => "host not found",
            ErrorClass::Timeout => "socket timeout",
            ErrorClass::Network => "network",
            ErrorClass::Proxy => "proxy",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Other => "other",
        }
    }
}

/// Map a transport error to its class
pub fn classify(error: &TransportError) -> ErrorClass {
    match error {
        TransportError::Io(e) => match e.kind() {
            ErrorKind::ConnectionRefused => ErrorClass::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ErrorClass::RemoteClosed,
            ErrorKind::TimedOut => ErrorClass::Timeout,
            ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkDown
            | ErrorKind::AddrNotAvailable
            | ErrorKind::NotConnected => ErrorClass::Network,
            _ => ErrorClass::Other,
        },
        TransportError::Closed => ErrorClass::RemoteClosed,
        TransportError::HostNotFound(_) => ErrorClass::HostNotFound,
        TransportError::Timeout => ErrorClass::Timeout,
        TransportError::Proxy(_) => ErrorClass::Proxy,
        TransportError::Protocol(_) => ErrorClass::Protocol,
        TransportError::ConnectionFailed(_) => ErrorClass::Other,
    }
}

/// Sink for classified transport errors
pub trait Diagnostics: Send + Sync {
    /// Report `error` raised by a socket tagged with `postfix`
    fn report(&self, postfix: &str, class: ErrorClass, error: &TransportError);
}

/// Default sink writing to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, postfix: &str, class: ErrorClass, error: &TransportError) {
        if class.level() == Level::DEBUG {
            debug!("TCP{} Info: {} - {}", postfix, class.describe(), error);
        } else {
            warn!("TCP{} Error: {} - {}", postfix, class.describe(), error);
        }
    }
}
