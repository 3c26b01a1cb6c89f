//! Process-wide unix clock with a server-synchronised offset
//!
//! The fake-TLS ClientHello embeds the current time, and peers reject
//! greetings from badly skewed clocks. When a socket asks for a resync
//! ([`crate::SocketEvent::SyncTimeRequest`]) the layer above fetches the
//! server time and feeds it to [`update`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static OFFSET: AtomicI64 = AtomicI64::new(0);

fn system_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current unix time corrected by the last known server offset
pub fn now() -> i64 {
    system_now() + OFFSET.load(Ordering::Relaxed)
}

/// Record the server's notion of the current unix time
pub fn update(server_now: i64) {
    let offset = server_now - system_now();
    OFFSET.store(offset, Ordering::Relaxed);
    tracing::debug!("Unixtime offset updated to {}s", offset);
}

/// Current offset from the local clock in seconds
pub fn offset() -> i64 {
    OFFSET.load(Ordering::Relaxed)
}
