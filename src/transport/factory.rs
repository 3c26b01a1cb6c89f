//! Socket factory

use super::{Diagnostics, FakeTlsSocket, PlainSocket, Socket, TransportConfig};
use crate::proxy::{ProxyData, ProxyType};
use crate::secret::Secret;
use crate::Result;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Build the socket variant matching the effective secret
///
/// An MTProto proxy's own secret takes priority over `secret`. A secret
/// starting with `0xEE` selects [`FakeTlsSocket`]; anything else, including
/// an empty secret, selects [`PlainSocket`].
pub fn create_socket(
    handle: Handle,
    secret: &Secret,
    proxy: &ProxyData,
    config: &TransportConfig,
    diagnostics: Arc<dyn Diagnostics>,
) -> Result<Box<dyn Socket>> {
    let proxy_secret = match proxy.kind {
        ProxyType::Mtproto => proxy.secret_from_mtproto_password(),
        _ => Secret::default(),
    };
    let using = if proxy_secret.is_empty() {
        secret
    } else {
        &proxy_secret
    };

    if using.is_fake_tls() {
        debug!("Creating fake-TLS socket ({:?})", using);
        let socket = FakeTlsSocket::new(handle, using, proxy, config, diagnostics)?;
        Ok(Box::new(socket))
    } else {
        debug!("Creating plain socket ({:?})", using);
        Ok(Box::new(PlainSocket::new(handle, proxy, config, diagnostics)))
    }
}
