//! Connection secrets
//!
//! A secret is an opaque obfuscation key handed down from server options or
//! from an MTProto proxy link. Only its first byte matters at the socket
//! layer: [`FAKE_TLS_SENTINEL`] selects the fake-TLS transport, in which case
//! the secret is laid out as `0xEE | key[16] | domain`.

use crate::protocol::{FAKE_TLS_SECRET_MIN_LEN, FAKE_TLS_SENTINEL, PADDED_SENTINEL};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;

const KEY_LEN: usize = 16;

/// Raw connection secret bytes
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a textual secret, hex first, then base64url (padding optional)
    ///
    /// Returns an empty secret when the text is in neither encoding.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::default();
        }
        if text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Ok(bytes) = hex::decode(text) {
                return Self(bytes);
            }
        }
        let normalized: String = text
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                c => c,
            })
            .collect();
        URL_SAFE_NO_PAD
            .decode(normalized)
            .map(Self)
            .unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the endpoint expects TLS-disguised framing
    pub fn is_fake_tls(&self) -> bool {
        self.0.first() == Some(&FAKE_TLS_SENTINEL)
    }

    /// Whether the secret has one of the accepted shapes
    ///
    /// Accepted: empty, 16 raw bytes, 17 bytes tagged 0xDD, or 21+ bytes
    /// tagged 0xEE.
    pub fn validate(&self) -> bool {
        match self.0.first() {
            None => true,
            Some(&FAKE_TLS_SENTINEL) if self.0.len() >= FAKE_TLS_SECRET_MIN_LEN => true,
            Some(&PADDED_SENTINEL) if self.0.len() == KEY_LEN + 1 => true,
            _ => self.0.len() == KEY_LEN,
        }
    }

    /// HMAC key of a fake-TLS secret
    pub fn fake_tls_key(&self) -> Option<&[u8]> {
        self.fake_tls_parts().map(|(key, _)| key)
    }

    /// SNI domain of a fake-TLS secret
    pub fn fake_tls_domain(&self) -> Option<&[u8]> {
        self.fake_tls_parts().map(|(_, domain)| domain)
    }

    fn fake_tls_parts(&self) -> Option<(&[u8], &[u8])> {
        if !self.is_fake_tls() || self.0.len() < FAKE_TLS_SECRET_MIN_LEN {
            return None;
        }
        Some((&self.0[1..1 + KEY_LEN], &self.0[1 + KEY_LEN..]))
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Secret {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.0.first().copied().unwrap_or_default();
        write!(f, "Secret({} bytes, tag {:02x})", self.0.len(), tag)
    }
}
