//! Fake-TLS socket
//!
//! Wraps the connection in a TLS 1.3 lookalike:
//! - on connect, sends a browser-shaped ClientHello authenticated with the
//!   secret key
//! - validates the server's answer in stages as bytes arrive, ending with an
//!   HMAC check over both digests
//! - then exchanges application data records in both directions
//!
//! ## State machine
//!
//! ```text
//! NotConnected -> Connecting -> WaitingHello -> Connected -> Disconnected
//!                      |              |             |
//!                      +--------------+-------------+-----> Error
//! ```
//!
//! States only move forward. `Error` and `Disconnected` are terminal.

use super::link::{Connector, Link, RawEvent, RawState};
use super::{classify, Diagnostics, Socket, SocketEvent, SocketKind, TransportConfig, TransportError};
use crate::buffer::{check_part, read_length, IncomingBuffer};
use crate::crypto::verify_hmac_sha256;
use crate::obfuscation::{frame_client_records, generate_client_hello};
use crate::protocol::{
    ProtocolError, HELLO_DIGEST_LEN, LENGTH_SIZE, RECORD_HEADER_SIZE, SERVER_HEADER,
    SERVER_HELLO_DIGEST_POSITION, SERVER_HELLO_PART1, SERVER_HELLO_PART3,
};
use crate::proxy::ProxyData;
use crate::secret::Secret;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Record header plus length of the ServerHello record
const PARTS1_SIZE: usize = SERVER_HELLO_PART1.len() + LENGTH_SIZE;

/// Connection state of a [`FakeTlsSocket`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsState {
    NotConnected,
    Connecting,
    WaitingHello,
    Connected,
    Disconnected,
    Error,
}

/// Progress through the ServerHello checks
///
/// Offsets count from the start of the incoming buffer, which begins with
/// the 32-byte client digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelloStage {
    /// Waiting for the ServerHello record header
    Header,
    /// Waiting for the ChangeCipherSpec and application data header
    ChangeCipher { parts123: usize },
    /// Waiting for the full greeting to check the digest
    Digest { full: usize },
}

/// TLS-disguised transport
pub struct FakeTlsSocket {
    key: Vec<u8>,
    domain: Vec<u8>,
    connector: Connector,
    link: Option<Link>,
    state: TlsState,
    stage: HelloStage,
    incoming: IncomingBuffer,
    pending: VecDeque<SocketEvent>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl FakeTlsSocket {
    /// Create a socket for a `0xEE` secret
    pub fn new(
        handle: Handle,
        secret: &Secret,
        proxy: &ProxyData,
        config: &TransportConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let (Some(key), Some(domain)) = (secret.fake_tls_key(), secret.fake_tls_domain()) else {
            return Err(Error::InvalidSecret(format!(
                "fake-TLS secret needs at least 21 bytes, got {}",
                secret.len()
            )));
        };

        Ok(Self {
            key: key.to_vec(),
            domain: domain.to_vec(),
            connector: Connector::new(handle, proxy.clone(), config.clone()),
            link: None,
            state: TlsState::NotConnected,
            stage: HelloStage::Header,
            incoming: IncomingBuffer::new(),
            pending: VecDeque::new(),
            diagnostics,
        })
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    fn finished(&self) -> bool {
        matches!(self.state, TlsState::Error | TlsState::Disconnected)
    }

    fn handle_raw(&mut self, event: RawEvent) {
        match event {
            RawEvent::Connected => self.plain_connected(),
            RawEvent::Data(chunk) => self.plain_ready_read(&chunk),
            RawEvent::Disconnected => self.plain_disconnected(),
            RawEvent::Error(error) => self.fail(error),
        }
    }

    /// TCP is up: send the hello and start waiting for the answer
    fn plain_connected(&mut self) {
        if self.state != TlsState::Connecting {
            return;
        }
        let hello = match generate_client_hello(&self.domain, &self.key) {
            Ok(hello) => hello,
            Err(e) => {
                warn!("TLS Error: {}", e);
                self.fail(e.into());
                return;
            }
        };

        self.incoming = IncomingBuffer::with_prefix(&hello.digest);
        self.stage = HelloStage::Header;
        self.state = TlsState::WaitingHello;
        if let Some(link) = &mut self.link {
            link.send(Bytes::from(hello.data));
        }
    }

    fn plain_ready_read(&mut self, chunk: &[u8]) {
        match self.state {
            TlsState::WaitingHello => {
                self.incoming.append(chunk);
                match self.read_hello() {
                    Ok(true) => self.hello_accepted(),
                    Ok(false) => {}
                    Err(e) => {
                        warn!("TLS Error: {}", e);
                        self.fail(e.into());
                    }
                }
            }
            TlsState::Connected => {
                self.incoming.append(chunk);
                if let Err(e) = self.check_next_packet() {
                    warn!("TLS Error: {}", e);
                    self.fail(e.into());
                    return;
                }
                if self.incoming.has_good_data() {
                    self.pending.push_back(SocketEvent::ReadyRead);
                }
            }
            _ => {}
        }
    }

    fn plain_disconnected(&mut self) {
        if self.state == TlsState::Connected {
            self.state = TlsState::Disconnected;
            self.incoming.clear();
            if let Some(link) = &mut self.link {
                link.close();
            }
            self.pending.push_back(SocketEvent::Disconnected);
        } else {
            self.fail(TransportError::Closed);
        }
    }

    /// Run the staged ServerHello checks on whatever is buffered
    ///
    /// Returns `Ok(true)` once the whole greeting is verified and consumed.
    fn read_hello(&mut self) -> std::result::Result<bool, ProtocolError> {
        loop {
            let data = self.incoming.as_slice();
            match self.stage {
                HelloStage::Header => {
                    let end = HELLO_DIGEST_LEN + PARTS1_SIZE;
                    if data.len() < end {
                        return Ok(false);
                    }
                    if !check_part(&data[HELLO_DIGEST_LEN..], SERVER_HELLO_PART1) {
                        return Err(ProtocolError::BadServerHelloHeader);
                    }
                    let part2 = read_length(data, end - LENGTH_SIZE)
                        .ok_or(ProtocolError::BadServerHelloHeader)?;
                    self.stage = HelloStage::ChangeCipher {
                        parts123: PARTS1_SIZE + part2 + SERVER_HELLO_PART3.len() + LENGTH_SIZE,
                    };
                }
                HelloStage::ChangeCipher { parts123 } => {
                    let end = HELLO_DIGEST_LEN + parts123;
                    if data.len() < end {
                        return Ok(false);
                    }
                    let part3 = end - LENGTH_SIZE - SERVER_HELLO_PART3.len();
                    if !check_part(&data[part3..], SERVER_HELLO_PART3) {
                        return Err(ProtocolError::BadServerHelloChangeCipher);
                    }
                    let part4 = read_length(data, end - LENGTH_SIZE)
                        .ok_or(ProtocolError::BadServerHelloChangeCipher)?;
                    self.stage = HelloStage::Digest { full: end + part4 };
                }
                HelloStage::Digest { full } => {
                    if data.len() < full {
                        return Ok(false);
                    }
                    let position = HELLO_DIGEST_LEN + SERVER_HELLO_DIGEST_POSITION;
                    if full < position + HELLO_DIGEST_LEN {
                        return Err(ProtocolError::BadServerHelloDigest);
                    }

                    let mut greeting = data[..full].to_vec();
                    let mut digest = [0u8; HELLO_DIGEST_LEN];
                    digest.copy_from_slice(&greeting[position..position + HELLO_DIGEST_LEN]);
                    greeting[position..position + HELLO_DIGEST_LEN].fill(0);
                    if !verify_hmac_sha256(&self.key, &greeting, &digest) {
                        return Err(ProtocolError::BadServerHelloDigest);
                    }

                    self.incoming.consume(full);
                    return Ok(true);
                }
            }
        }
    }

    fn hello_accepted(&mut self) {
        debug!("TLS Info: server hello verified");
        self.state = TlsState::Connected;
        self.pending.push_back(SocketEvent::Connected);
        if let Err(e) = self.check_next_packet() {
            warn!("TLS Error: {}", e);
            self.fail(e.into());
            return;
        }
        if self.incoming.has_good_data() {
            self.pending.push_back(SocketEvent::ReadyRead);
        }
    }

    /// Open the data window over the next complete record, if any
    fn check_next_packet(&mut self) -> std::result::Result<(), ProtocolError> {
        while !self.incoming.window_open() {
            let data = self.incoming.as_slice();
            if data.len() < RECORD_HEADER_SIZE {
                return Ok(());
            }
            if !check_part(data, SERVER_HEADER) {
                return Err(ProtocolError::BadRecordHeader([data[0], data[1], data[2]]));
            }
            let length = read_length(data, SERVER_HEADER.len()).unwrap_or_default();
            if length == 0 {
                self.incoming.consume(RECORD_HEADER_SIZE);
                continue;
            }
            if data.len() < RECORD_HEADER_SIZE + length {
                return Ok(());
            }
            self.incoming.set_window(RECORD_HEADER_SIZE, length);
        }
        Ok(())
    }

    /// Drop the drained record and move to the next one
    fn shift_incoming(&mut self) -> std::result::Result<(), ProtocolError> {
        if self.incoming.window_open() {
            self.incoming.finish_window();
        }
        self.check_next_packet()
    }

    fn fail(&mut self, error: TransportError) {
        if self.finished() {
            return;
        }
        if self.state != TlsState::Connected {
            self.pending.push_back(SocketEvent::SyncTimeRequest);
        }
        self.state = TlsState::Error;
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
    fn with_link(secret: &Secret, link: Link) -> Self {
        let mut socket = Self::new(
            Handle::current(),
            secret,
            &ProxyData::none(),
            &TransportConfig::default(),
            Arc::new(super::TracingDiagnostics),
        )
        .unwrap();
        socket.link = Some(link);
        socket.state = TlsState::Connecting;
        socket
    }
}

#[async_trait]
impl Socket for FakeTlsSocket {
    fn connect_to_host(&mut self, address: &str, port: u16) {
        if self.state != TlsState::NotConnected {
            warn!("TLS Error: connect_to_host called twice, ignoring {}:{}", address, port);
            return;
        }
        debug!("TLS Info: connecting to {}:{}", address, port);
        self.state = TlsState::Connecting;
        self.link = Some(self.connector.start(address, port));
    }

    fn is_connected(&self) -> bool {
        self.state == TlsState::Connected
    }

    fn has_bytes_available(&self) -> bool {
        self.state == TlsState::Connected && self.incoming.has_good_data()
    }

    fn read(&mut self, buffer: &mut [u8]) -> usize {
        if self.state != TlsState::Connected {
            return 0;
        }
        let mut total = 0;
        loop {
            total += self.incoming.read_good(&mut buffer[total..]);
            if self.incoming.has_good_data() {
                break;
            }
            if let Err(e) = self.shift_incoming() {
                warn!("TLS Error: {}", e);
                self.fail(e.into());
                break;
            }
            if total == buffer.len() || !self.incoming.has_good_data() {
                break;
            }
        }
        total
    }

    fn write(&mut self, prefix: &[u8], buffer: &[u8]) {
        if self.state != TlsState::Connected {
            debug!("TLS Info: write in state {:?} dropped", self.state);
            return;
        }
        if prefix.is_empty() && buffer.is_empty() {
            return;
        }
        let framed = frame_client_records(prefix, buffer);
        if let Some(link) = &mut self.link {
            link.send(framed.freeze());
        }
    }

    fn debug_state(&self) -> i32 {
        self.link
            .as_ref()
            .map_or(RawState::Unconnected, Link::state) as i32
    }

    fn kind(&self) -> SocketKind {
        SocketKind::FakeTls
    }

    fn is_good_start_nonce(&self, _nonce: &[u8]) -> bool {
        true
    }

    fn timed_out(&mut self) {
        if !self.finished() {
            self.pending.push_back(SocketEvent::SyncTimeRequest);
        }
    }

    async fn next_event(&mut self) -> Option<SocketEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished() {
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

impl Drop for FakeTlsSocket {
    fn drop(&mut self) {
        if let Some(link) = &mut self.link {
            link.close();
        }
    }
}
