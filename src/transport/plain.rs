//! Plain TCP socket
//!
//! Bytes pass through untouched. The connection may still run through a
//! SOCKS5 or HTTP CONNECT proxy, which the link driver negotiates before
//! reporting the socket as connected.

use super::link::{Connector, Link, RawEvent, RawState};
use super::{classify, Diagnostics, Socket, SocketEvent, SocketKind, TransportConfig, TransportError};
use crate::proxy::ProxyData;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// First-word values a start nonce must not take, so the obfuscated stream
/// can't be mistaken for HTTP, the padded intermediate tag, or a TLS record
const RESERVED_NONCE_WORDS: [u32; 6] = [
    0x44414548, // HEAD
    0x54534F50, // POST
    0x20544547, // GET
    0xEEEEEEEE,
    0xDDDDDDDD,
    0x02010316,
];

/// Abridged transport marker byte
const ABRIDGED_TAG: u8 = 0xEF;

/// Raw TCP transport
pub struct PlainSocket {
    connector: Connector,
    link: Option<Link>,
    incoming: BytesMut,
    pending: VecDeque<SocketEvent>,
    finished: bool,
    diagnostics: Arc<dyn Diagnostics>,
}

impl PlainSocket {
    pub fn new(
        handle: Handle,
        proxy: &ProxyData,
        config: &TransportConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            connector: Connector::new(handle, proxy.clone(), config.clone()),
            link: None,
            incoming: BytesMut::new(),
            pending: VecDeque::new(),
            finished: false,
            diagnostics,
        }
    }

    fn handle_raw(&mut self, event: RawEvent) {
        match event {
            RawEvent::Connected => self.pending.push_back(SocketEvent::Connected),
            RawEvent::Data(chunk) => {
                self.incoming.extend_from_slice(&chunk);
                self.pending.push_back(SocketEvent::ReadyRead);
            }
            RawEvent::Disconnected => {
                self.finished = true;
                if let Some(link) = &mut self.link {
                    link.close();
                }
                self.pending.push_back(SocketEvent::Disconnected);
            }
            RawEvent::Error(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: TransportError) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.incoming.clear();
        if let Some(link) = &mut self.link {
            link.close();
        }

        let kind = self.kind();
        self.diagnostics
            .report(kind.debug_postfix(), classify(&error), &error);
        self.pending.push_back(SocketEvent::Error(error));
    }

    #[cfg(test)]
    fn with_link(link: Link) -> Self {
        let mut socket = Self::new(
            Handle::current(),
            &ProxyData::none(),
            &TransportConfig::default(),
            Arc::new(super::TracingDiagnostics),
        );
        socket.link = Some(link);
        socket
    }
}

#[async_trait]
impl Socket for PlainSocket {
    fn connect_to_host(&mut self, address: &str, port: u16) {
        if self.link.is_some() {
            warn!("TCP Error: connect_to_host called twice, ignoring {}:{}", address, port);
            return;
        }
        debug!("TCP Info: connecting to {}:{}", address, port);
        self.link = Some(self.connector.start(address, port));
    }

    fn is_connected(&self) -> bool {
        !self.finished
            && self
                .link
                .as_ref()
                .map_or(false, |link| link.state() == RawState::Connected)
    }

    fn has_bytes_available(&self) -> bool {
        !self.incoming.is_empty()
    }

    fn read(&mut self, buffer: &mut [u8]) -> usize {
        let count = buffer.len().min(self.incoming.len());
        buffer[..count].copy_from_slice(&self.incoming[..count]);
        self.incoming.advance(count);
        count
    }

    fn write(&mut self, prefix: &[u8], buffer: &[u8]) {
        if self.finished {
            debug!("TCP Info: write after close dropped");
            return;
        }
        let Some(link) = &mut self.link else {
            warn!("TCP Error: write before connect_to_host dropped");
            return;
        };
        let mut data = BytesMut::with_capacity(prefix.len() + buffer.len());
        data.extend_from_slice(prefix);
        data.extend_from_slice(buffer);
        link.send(data.freeze());
    }

    fn debug_state(&self) -> i32 {
        self.link
            .as_ref()
            .map_or(RawState::Unconnected, Link::state) as i32
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Plain
    }

    fn is_good_start_nonce(&self, nonce: &[u8]) -> bool {
        if nonce.len() < 8 {
            return false;
        }
        let first = u32::from_le_bytes([nonce[0], nonce[1], nonce[2], nonce[3]]);
        let second = u32::from_le_bytes([nonce[4], nonce[5], nonce[6], nonce[7]]);
        nonce[0] != ABRIDGED_TAG && !RESERVED_NONCE_WORDS.contains(&first) && second != 0
    }

    fn timed_out(&mut self) {}

    async fn next_event(&mut self) -> Option<SocketEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            let raw = self.link.as_mut()?.recv().await;
            match raw {
                Some(event) => self.handle_raw(event),
                None => self.fail(TransportError::Closed),
            }
        }
    }
}

impl Drop for PlainSocket {
    fn drop(&mut self) {
        if let Some(link) = &mut self.link {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::link::LinkPeer;
    use std::io;

    fn socket() -> (PlainSocket, LinkPeer) {
        let (link, peer) = Link::pair();
        (PlainSocket::with_link(link), peer)
    }

    #[tokio::test]
    async fn test_pass_through() {
        let (mut socket, mut peer) = socket();
        assert!(!socket.is_connected());
        assert_eq!(socket.debug_state(), 2);

        peer.push(RawEvent::Connected);
        assert!(matches!(socket.next_event().await, Some(SocketEvent::Connected)));
        assert!(socket.is_connected());
        assert_eq!(socket.debug_state(), 3);

        socket.write(b"pre", b"fix");
        assert_eq!(peer.written(), b"prefix");

        peer.data(b"hello ");
        peer.data(b"world");
        assert!(matches!(socket.next_event().await, Some(SocketEvent::ReadyRead)));
        assert!(matches!(socket.next_event().await, Some(SocketEvent::ReadyRead)));
        assert!(socket.has_bytes_available());

        let mut buf = [0u8; 8];
        assert_eq!(socket.read(&mut buf), 8);
        assert_eq!(&buf, b"hello wo");
        assert_eq!(socket.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"rld");
        assert!(!socket.has_bytes_available());
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let (mut socket, peer) = socket();
        peer.push(RawEvent::Connected);
        peer.push(RawEvent::Disconnected);
        assert!(matches!(socket.next_event().await, Some(SocketEvent::Connected)));
        assert!(matches!(socket.next_event().await, Some(SocketEvent::Disconnected)));
        assert!(socket.next_event().await.is_none());
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_error_fires_once() {
        let (mut socket, peer) = socket();
        peer.push(RawEvent::Error(TransportError::Io(io::Error::from(
            io::ErrorKind::ConnectionRefused,
        ))));
        peer.push(RawEvent::Error(TransportError::Closed));

        match socket.next_event().await {
            Some(SocketEvent::Error(TransportError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(socket.next_event().await.is_none());
        assert_eq!(socket.debug_state(), 0);
    }

    #[tokio::test]
    async fn test_peer_gone_is_error() {
        let (mut socket, peer) = socket();
        drop(peer);
        assert!(matches!(
            socket.next_event().await,
            Some(SocketEvent::Error(TransportError::Closed))
        ));
        assert!(socket.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_no_events_before_connect() {
        let mut socket = PlainSocket::new(
            Handle::current(),
            &ProxyData::none(),
            &TransportConfig::default(),
            Arc::new(super::super::TracingDiagnostics),
        );
        assert!(socket.next_event().await.is_none());
        assert_eq!(socket.debug_state(), 0);
    }

    #[tokio::test]
    async fn test_start_nonce_filter() {
        let (socket, _peer) = socket();
        assert!(socket.is_good_start_nonce(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(!socket.is_good_start_nonce(&[0xEF, 2, 3, 4, 5, 6, 7, 8]));
        assert!(!socket.is_good_start_nonce(b"HEAD 123"));
        assert!(!socket.is_good_start_nonce(b"POST 123"));
        assert!(!socket.is_good_start_nonce(b"GET /123"));
        assert!(!socket.is_good_start_nonce(&[0xEE, 0xEE, 0xEE, 0xEE, 1, 2, 3, 4]));
        assert!(!socket.is_good_start_nonce(&[0x16, 0x03, 0x01, 0x02, 1, 2, 3, 4]));
        assert!(!socket.is_good_start_nonce(&[1, 2, 3, 4, 0, 0, 0, 0]));
        assert!(!socket.is_good_start_nonce(&[1, 2, 3]));
    }
}
