//! HTTP CONNECT client handshake

use super::{Address, ProxyError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Upper bound on the proxy's response head
const MAX_RESPONSE_HEAD: usize = 8192;

fn encode_request(target: &Address, credentials: Option<(&str, &str)>) -> String {
    let authority = target.to_string();
    let mut request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: keep-alive\r\n"
    );
    if let Some((user, password)) = credentials {
        let token = STANDARD.encode(format!("{}:{}", user, password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    request
}

fn parse_status(head: &str) -> Result<u16, ProxyError> {
    let line = head.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::InvalidResponse(line.to_string()));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ProxyError::InvalidResponse(line.to_string()))
}

/// Ask the proxy on `stream` to CONNECT to `target`
///
/// Reads the response head byte by byte so no tunneled data is consumed.
pub(super) async fn connect(
    stream: &mut TcpStream,
    target: &Address,
    credentials: Option<(&str, &str)>,
) -> Result<(), ProxyError> {
    stream
        .write_all(encode_request(target, credentials).as_bytes())
        .await?;

    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(ProxyError::InvalidResponse("Response head too large".to_string()));
        }
        stream.read_exact(&mut byte).await?;
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    match parse_status(&head)? {
        200..=299 => {
            debug!("HTTP CONNECT tunnel established to {}", target);
            Ok(())
        }
        407 => Err(ProxyError::AuthenticationFailed),
        status => Err(ProxyError::HttpStatus(status)),
    }
}
