//! Traffic obfuscation layer
//!
//! Provides:
//! - Fake-TLS ClientHello generation (browser-shaped, HMAC-authenticated)
//! - TLS application-data record framing for outbound traffic
//!
//! ## Why TLS mimicry
//!
//! Passive observers classify flows by their first packets. Wrapping the
//! obfuscated stream in a TLS 1.3 handshake and record layer makes the
//! connection look like ordinary HTTPS to the domain named in the secret.

mod hello;
mod record;

pub use hello::{generate_client_hello, ClientHello};
pub use record::frame_client_records;
