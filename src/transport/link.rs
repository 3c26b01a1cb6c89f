//! Link driver: the task that owns the TCP stream
//!
//! A [`Link`] is the socket's view of its driver task. The task connects
//! (directly, through a tunneling proxy, or to an MTProto proxy endpoint),
//! then shuttles bytes: everything read from the stream is forwarded as
//! [`RawEvent::Data`], everything queued with [`Link::send`] is written out.
//! The socket never touches the stream itself.

use super::{TransportConfig, TransportError};
use crate::proxy::{negotiate, Address, ProxyData, ProxyError, ProxyType};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Underlying TCP state, numbered like the classic socket state codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RawState {
    Unconnected = 0,
    HostLookup = 1,
    Connecting = 2,
    Connected = 3,
    Closing = 6,
}

/// Event reported by the driver task
#[derive(Debug)]
pub(crate) enum RawEvent {
    Connected,
    Data(Bytes),
    Disconnected,
    Error(TransportError),
}

/// Socket-side handle to a driver task
pub(crate) struct Link {
    outbound: mpsc::UnboundedSender<Bytes>,
    events: mpsc::UnboundedReceiver<RawEvent>,
    task: Option<JoinHandle<()>>,
    state: RawState,
}

impl Link {
    /// Queue bytes for the wire
    pub fn send(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        if self.outbound.send(data).is_err() {
            trace!("Write dropped, link task is gone");
        }
    }

    /// Wait for the next raw event, tracking the TCP state
    pub async fn recv(&mut self) -> Option<RawEvent> {
        let event = self.events.recv().await;
        self.state = match &event {
            Some(RawEvent::Connected) | Some(RawEvent::Data(_)) => RawState::Connected,
            Some(RawEvent::Disconnected) | Some(RawEvent::Error(_)) | None => RawState::Unconnected,
        };
        event
    }

    pub fn state(&self) -> RawState {
        self.state
    }

    /// Stop the driver and drop anything still in flight
    ///
    /// A live connection torn down from this side reports
    /// [`RawState::Closing`]; anything else falls back to unconnected.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
        self.state = match self.state {
            RawState::Connected | RawState::Closing => RawState::Closing,
            _ => RawState::Unconnected,
        };
    }

    /// A link with no task behind it, driven by the returned peer
    #[cfg(test)]
    pub fn pair() -> (Link, LinkPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = Link {
            outbound: outbound_tx,
            events: events_rx,
            task: None,
            state: RawState::Connecting,
        };
        let peer = LinkPeer {
            events: events_tx,
            outbound: outbound_rx,
        };
        (link, peer)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Test-side end of [`Link::pair`]
#[cfg(test)]
pub(crate) struct LinkPeer {
    pub events: mpsc::UnboundedSender<RawEvent>,
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
}

#[cfg(test)]
impl LinkPeer {
    pub fn push(&self, event: RawEvent) {
        self.events.send(event).unwrap();
    }

    pub fn data(&self, bytes: &[u8]) {
        self.push(RawEvent::Data(Bytes::copy_from_slice(bytes)));
    }

    /// Everything the socket has written so far
    pub fn written(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.outbound.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Spawns driver tasks on a runtime for a given proxy setup
#[derive(Debug, Clone)]
pub(crate) struct Connector {
    handle: Handle,
    proxy: ProxyData,
    config: TransportConfig,
}

impl Connector {
    pub fn new(handle: Handle, proxy: ProxyData, config: TransportConfig) -> Self {
        Self {
            handle,
            proxy,
            config,
        }
    }

    /// Spawn a driver connecting to `host:port`
    pub fn start(&self, host: &str, port: u16) -> Link {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = self.handle.spawn(drive(
            host.to_string(),
            port,
            self.proxy.clone(),
            self.config.clone(),
            events_tx,
            outbound_rx,
        ));
        Link {
            outbound: outbound_tx,
            events: events_rx,
            task: Some(task),
            state: RawState::Connecting,
        }
    }
}

async fn drive(
    host: String,
    port: u16,
    proxy: ProxyData,
    config: TransportConfig,
    events: mpsc::UnboundedSender<RawEvent>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    let opened = tokio::time::timeout(
        config.connect_timeout(),
        open_stream(&host, port, &proxy, &config),
    )
    .await;
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = events.send(RawEvent::Error(e));
            return;
        }
        Err(_) => {
            let _ = events.send(RawEvent::Error(TransportError::Timeout));
            return;
        }
    };
    if events.send(RawEvent::Connected).is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; config.read_chunk_size.max(1)];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    let _ = events.send(RawEvent::Disconnected);
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(RawEvent::Data(chunk)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = events.send(RawEvent::Error(e.into()));
                    return;
                }
            },
            chunk = outbound.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = writer.write_all(&chunk).await {
                        let _ = events.send(RawEvent::Error(e.into()));
                        return;
                    }
                }
                None => {
                    let _ = writer.shutdown().await;
                    return;
                }
            },
        }
    }
}

/// Connect to the target, or to the proxy and negotiate a tunnel
async fn open_stream(
    host: &str,
    port: u16,
    proxy: &ProxyData,
    config: &TransportConfig,
) -> Result<TcpStream, TransportError> {
    match proxy.kind {
        ProxyType::None => dial(host, port, config).await,
        ProxyType::Mtproto => {
            debug!("Dialing MTProto proxy {}:{}", proxy.host, proxy.port);
            dial(&proxy.host, proxy.port, config).await
        }
        ProxyType::Socks5 | ProxyType::Http => {
            let mut stream = dial(&proxy.host, proxy.port, config)
                .await
                .map_err(|e| ProxyError::GeneralFailure(format!("Proxy unreachable: {}", e)))?;
            negotiate(proxy, &mut stream, &Address::new(host, port)).await?;
            Ok(stream)
        }
    }
}

async fn dial(host: &str, port: u16, config: &TransportConfig) -> Result<TcpStream, TransportError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| TransportError::HostNotFound(format!("{}: {}", host, e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match connect_addr(addr, config).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(TransportError::Io(e)),
        None => Err(TransportError::HostNotFound(host.to_string())),
    }
}

async fn connect_addr(addr: SocketAddr, config: &TransportConfig) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(size) = config.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = config.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(config.nodelay).ok();
    Ok(stream)
}
