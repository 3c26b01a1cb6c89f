//! Protocol definitions and constants for the fake-TLS wire format

use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Could not generate Client Hello: {0}")]
    HelloGeneration(String),

    #[error("Bad Server Hello header")]
    BadServerHelloHeader,

    #[error("Bad Server Hello change cipher part")]
    BadServerHelloChangeCipher,

    #[error("Bad Server Hello digest")]
    BadServerHelloDigest,

    #[error("Bad packet header: {0:02x?}")]
    BadRecordHeader([u8; 3]),
}

/// First byte of a secret that requests fake-TLS framing
pub const FAKE_TLS_SENTINEL: u8 = 0xEE;

/// First byte of a secret that requests padded intermediate framing
pub const PADDED_SENTINEL: u8 = 0xDD;

/// Minimum length of a fake-TLS secret: sentinel, 16 key bytes, 4+ domain bytes
pub const FAKE_TLS_SECRET_MIN_LEN: usize = 21;

/// Exact length of a ClientHello on the wire
pub const CLIENT_HELLO_LEN: usize = 517;

/// Length of the HMAC-SHA256 digest carried in the hello random field
pub const HELLO_DIGEST_LEN: usize = 32;

/// Size of a record length field
pub const LENGTH_SIZE: usize = 2;

/// ServerHello record header prefix
pub const SERVER_HELLO_PART1: &[u8] = b"\x16\x03\x03";

/// ChangeCipherSpec record followed by the application data header
pub const SERVER_HELLO_PART3: &[u8] = b"\x14\x03\x03\x00\x01\x01\x17\x03\x03";

/// Offset of the digest inside the ServerHello
pub const SERVER_HELLO_DIGEST_POSITION: usize = 11;

/// Header of an inbound application data record
pub const SERVER_HEADER: &[u8] = b"\x17\x03\x03";

/// Maximum payload written into one outbound record
pub const CLIENT_PART_SIZE: usize = 2878;

/// ChangeCipherSpec sent once before the first prefixed write
pub const CLIENT_PREFIX: &[u8] = b"\x14\x03\x03\x00\x01\x01";

/// Header of an outbound application data record
pub const CLIENT_HEADER: &[u8] = b"\x17\x03\x03";

/// Full record header size (type, version, length)
pub const RECORD_HEADER_SIZE: usize = 5;
