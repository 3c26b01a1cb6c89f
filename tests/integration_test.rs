//! Integration tests for mtproto-socket
//!
//! Runs real sockets against local peers:
//! - a fake-TLS server that checks the ClientHello and answers with a signed
//!   ServerHello
//! - a plain echo server
//! - SOCKS5 and HTTP CONNECT proxies in front of the echo server

use mtproto_socket::crypto::hmac_sha256;
use mtproto_socket::protocol::{
    ProtocolError, CLIENT_HELLO_LEN, CLIENT_PREFIX, SERVER_HEADER, SERVER_HELLO_PART1,
    SERVER_HELLO_PART3,
};
use mtproto_socket::transport::{Diagnostics, ErrorClass, TracingDiagnostics, TransportError};
use mtproto_socket::{create_socket, ProxyData, Secret, Socket, SocketEvent, SocketKind, TransportConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;

const KEY: [u8; 16] = [
    0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2, 0xe1, 0xf0,
];
const DOMAIN: &[u8] = b"cdn.example.net";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn fake_tls_secret() -> Secret {
    let mut bytes = vec![0xEE];
    bytes.extend_from_slice(&KEY);
    bytes.extend_from_slice(DOMAIN);
    Secret::new(bytes)
}

/// Diagnostics sink that remembers what it was told
#[derive(Default)]
struct Recorder {
    reports: Mutex<Vec<(String, ErrorClass)>>,
}

impl Diagnostics for Recorder {
    fn report(&self, postfix: &str, class: ErrorClass, _error: &TransportError) {
        self.reports.lock().unwrap().push((postfix.to_string(), class));
    }
}

fn socket_for(secret: &Secret, proxy: &ProxyData, diagnostics: Arc<dyn Diagnostics>) -> Box<dyn Socket> {
    create_socket(
        Handle::current(),
        secret,
        proxy,
        &TransportConfig::default(),
        diagnostics,
    )
    .expect("Failed to create socket")
}

async fn next_event(socket: &mut Box<dyn Socket>) -> Option<SocketEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, socket.next_event())
        .await
        .expect("Timed out waiting for socket event")
}

/// Read until `len` application bytes have arrived
async fn read_exactly(socket: &mut Box<dyn Socket>, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while out.len() < len {
        match next_event(socket).await {
            Some(SocketEvent::ReadyRead) => loop {
                let n = socket.read(&mut buf);
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            },
            other => panic!("unexpected event {:?}", other),
        }
    }
    out
}

/// Check the hello digest the way a fake-TLS server does
fn verify_client_hello(hello: &[u8]) -> [u8; 32] {
    assert_eq!(hello.len(), CLIENT_HELLO_LEN);
    assert_eq!(&hello[..3], b"\x16\x03\x01");

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hello[11..43]);

    let mut zeroed = hello.to_vec();
    zeroed[11..43].fill(0);
    let expected = hmac_sha256(&KEY, &zeroed);
    assert_eq!(&digest[..28], &expected[..28]);

    let mut stamp = [0u8; 4];
    for i in 0..4 {
        stamp[i] = digest[28 + i] ^ expected[28 + i];
    }
    let stamp = i32::from_le_bytes(stamp) as i64;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    assert!((stamp - now).abs() < 60, "hello timestamp {} is off", stamp);

    digest
}

fn server_hello(client_digest: &[u8], corrupt: bool) -> Vec<u8> {
    let mut hello = Vec::new();
    hello.extend_from_slice(SERVER_HELLO_PART1);
    hello.extend_from_slice(&122u16.to_be_bytes());
    hello.extend_from_slice(&[0x02; 122]);
    hello.extend_from_slice(SERVER_HELLO_PART3);
    hello.extend_from_slice(&144u16.to_be_bytes());
    hello.extend_from_slice(&[0x33; 144]);

    let mut signed = client_digest.to_vec();
    signed.extend_from_slice(&hello);
    let digest = hmac_sha256(&KEY, &signed);
    hello[11..43].copy_from_slice(&digest);
    if corrupt {
        hello[200] ^= 0x01;
    }
    hello
}

fn server_record(payload: &[u8]) -> Vec<u8> {
    let mut out = SERVER_HEADER.to_vec();
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Serve one fake-TLS client: verify the hello, answer, then echo one record
async fn serve_fake_tls(mut stream: TcpStream, corrupt: bool) {
    let mut hello = vec![0u8; CLIENT_HELLO_LEN];
    stream.read_exact(&mut hello).await.unwrap();
    let digest = verify_client_hello(&hello);

    // Header first, the rest after a pause, so the client sees a split greeting
    let greeting = server_hello(&digest, corrupt);
    stream.write_all(&greeting[..5]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(&greeting[5..]).await.unwrap();
    if corrupt {
        // Keep the connection open; the client must give up on its own
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        return;
    }

    let mut prefix = [0u8; 6];
    stream.read_exact(&mut prefix).await.unwrap();
    assert_eq!(&prefix[..], CLIENT_PREFIX);

    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[..3], b"\x17\x03\x03");
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();

    let reply = server_record(&payload);
    stream.write_all(&reply[..3]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(&reply[3..]).await.unwrap();
    stream.shutdown().await.unwrap();
}

async fn echo(mut stream: TcpStream) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Fake-TLS handshake and record exchange against a real server
#[tokio::test]
async fn test_fake_tls_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_fake_tls(stream, false).await;
    });

    let mut socket = socket_for(&fake_tls_secret(), &ProxyData::none(), Arc::new(TracingDiagnostics));
    assert_eq!(socket.kind(), SocketKind::FakeTls);
    assert!(socket.is_good_start_nonce(b"HEAD 123"));

    socket.connect_to_host("127.0.0.1", port);
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Connected)));
    assert!(socket.is_connected());
    assert!(!socket.has_bytes_available());

    socket.write(b"obfuscation-init", b"ping");
    let reply = read_exactly(&mut socket, 20).await;
    assert_eq!(reply, b"obfuscation-initping");

    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Disconnected)));
    assert!(next_event(&mut socket).await.is_none());
    assert!(!socket.is_connected());
    server.await.unwrap();
}

/// A greeting with a bad digest ends the socket with a single error
#[tokio::test]
async fn test_fake_tls_digest_mismatch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_fake_tls(stream, true).await;
    });

    let recorder = Arc::new(Recorder::default());
    let mut socket = socket_for(&fake_tls_secret(), &ProxyData::none(), recorder.clone());
    socket.connect_to_host("127.0.0.1", port);

    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::SyncTimeRequest)));
    assert!(matches!(
        next_event(&mut socket).await,
        Some(SocketEvent::Error(TransportError::Protocol(
            ProtocolError::BadServerHelloDigest
        )))
    ));
    assert!(next_event(&mut socket).await.is_none());
    assert!(!socket.is_connected());
    assert_eq!(socket.read(&mut [0u8; 16]), 0);

    let reports = recorder.reports.lock().unwrap().clone();
    assert_eq!(reports, vec![("_ee".to_string(), ErrorClass::Protocol)]);

    // Dropping the socket closes the connection
    drop(socket);
    server.await.unwrap();
}

/// A silent server leaves the socket waiting; the caller decides when to give up
#[tokio::test]
async fn test_fake_tls_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut hello = vec![0u8; CLIENT_HELLO_LEN];
        stream.read_exact(&mut hello).await.unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    });

    let mut socket = socket_for(&fake_tls_secret(), &ProxyData::none(), Arc::new(TracingDiagnostics));
    socket.connect_to_host("127.0.0.1", port);
    let waited = tokio::time::timeout(Duration::from_millis(300), socket.next_event()).await;
    assert!(waited.is_err());
    assert!(!socket.is_connected());
    assert_eq!(socket.debug_state(), 3);

    socket.timed_out();
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::SyncTimeRequest)));

    drop(socket);
    server.await.unwrap();
}

/// An MTProto proxy's secret picks fake-TLS and the proxy itself is dialed
#[tokio::test]
async fn test_mtproto_proxy_dials_proxy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_fake_tls(stream, false).await;
    });

    let proxy = ProxyData::mtproto("127.0.0.1", port, hex::encode(fake_tls_secret().as_bytes()));
    let mut socket = socket_for(&Secret::default(), &proxy, Arc::new(TracingDiagnostics));
    assert_eq!(socket.kind(), SocketKind::FakeTls);

    // The target address is ignored in favour of the proxy endpoint
    socket.connect_to_host("192.0.2.1", 443);
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Connected)));

    socket.write(b"init", b"data");
    assert_eq!(read_exactly(&mut socket, 8).await, b"initdata");
    server.await.unwrap();
}

/// Plain sockets pass bytes through unchanged
#[tokio::test]
async fn test_plain_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        echo(stream).await;
    });

    let mut socket = socket_for(&Secret::default(), &ProxyData::none(), Arc::new(TracingDiagnostics));
    assert_eq!(socket.kind(), SocketKind::Plain);
    assert_eq!(socket.debug_state(), 0);

    socket.connect_to_host("127.0.0.1", port);
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Connected)));
    assert!(socket.is_connected());

    socket.write(&[0xef], b"plain bytes");
    assert_eq!(read_exactly(&mut socket, 12).await, b"\xefplain bytes");
}

/// Refused connections are reported once and classified
#[tokio::test]
async fn test_plain_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let recorder = Arc::new(Recorder::default());
    let mut socket = socket_for(&Secret::default(), &ProxyData::none(), recorder.clone());
    socket.connect_to_host("127.0.0.1", port);

    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Error(_))));
    assert!(next_event(&mut socket).await.is_none());

    let reports = recorder.reports.lock().unwrap().clone();
    assert_eq!(reports, vec![(String::new(), ErrorClass::ConnectionRefused)]);
}

/// Minimal SOCKS5 proxy that echoes instead of connecting anywhere
async fn serve_socks5(mut stream: TcpStream) -> String {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting[0], 0x05);
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await.unwrap();
    assert!(methods.contains(&0x02));
    stream.write_all(&[0x05, 0x02]).await.unwrap();

    let mut auth_header = [0u8; 2];
    stream.read_exact(&mut auth_header).await.unwrap();
    let mut user = vec![0u8; auth_header[1] as usize];
    stream.read_exact(&mut user).await.unwrap();
    let mut password_len = [0u8; 1];
    stream.read_exact(&mut password_len).await.unwrap();
    let mut password = vec![0u8; password_len[0] as usize];
    stream.read_exact(&mut password).await.unwrap();
    assert_eq!((&user[..], &password[..]), (&b"alice"[..], &b"secret"[..]));
    stream.write_all(&[0x01, 0x00]).await.unwrap();

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await.unwrap();
    assert_eq!(&request[..3], &[0x05, 0x01, 0x00]);
    assert_eq!(request[3], 0x03);
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await.unwrap();
    let mut target = vec![0u8; len[0] as usize + 2];
    stream.read_exact(&mut target).await.unwrap();
    let port = u16::from_be_bytes([target[len[0] as usize], target[len[0] as usize + 1]]);
    let host = String::from_utf8(target[..len[0] as usize].to_vec()).unwrap();

    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    let target = format!("{}:{}", host, port);
    echo(stream).await;
    target
}

#[tokio::test]
async fn test_plain_through_socks5() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let proxy_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_socks5(stream).await
    });

    let proxy = ProxyData::socks5("127.0.0.1", port).with_credentials("alice", "secret");
    let mut socket = socket_for(&Secret::default(), &proxy, Arc::new(TracingDiagnostics));
    socket.connect_to_host("dc.example.org", 443);
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Connected)));

    socket.write(b"", b"via socks");
    assert_eq!(read_exactly(&mut socket, 9).await, b"via socks");

    drop(socket);
    assert_eq!(proxy_task.await.unwrap(), "dc.example.org:443");
}

#[tokio::test]
async fn test_plain_through_http_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let proxy_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .unwrap();
        echo(stream).await;
        String::from_utf8(head).unwrap()
    });

    let proxy = ProxyData::http("127.0.0.1", port);
    let mut socket = socket_for(&Secret::default(), &proxy, Arc::new(TracingDiagnostics));
    socket.connect_to_host("149.154.167.51", 443);
    assert!(matches!(next_event(&mut socket).await, Some(SocketEvent::Connected)));

    socket.write(b"ab", b"cd");
    assert_eq!(read_exactly(&mut socket, 4).await, b"abcd");

    drop(socket);
    let head = proxy_task.await.unwrap();
    assert!(head.starts_with("CONNECT 149.154.167.51:443 HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_http_proxy_rejection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        let _ = stream
            .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
            .await;
    });

    let recorder = Arc::new(Recorder::default());
    let proxy = ProxyData::http("127.0.0.1", port);
    let mut socket = socket_for(&Secret::default(), &proxy, recorder.clone());
    socket.connect_to_host("149.154.167.51", 443);

    assert!(matches!(
        next_event(&mut socket).await,
        Some(SocketEvent::Error(TransportError::Proxy(_)))
    ));
    let reports = recorder.reports.lock().unwrap().clone();
    assert_eq!(reports, vec![(String::new(), ErrorClass::Proxy)]);
}
