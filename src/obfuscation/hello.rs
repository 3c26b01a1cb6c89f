//! Fake-TLS ClientHello construction
//!
//! The hello is described by a small block template that mirrors the layout
//! of a mainstream browser's TLS 1.3 ClientHello: fixed bytes, GREASE values,
//! random fields, the SNI domain, an X25519 key share, length-prefixed scopes
//! and one shuffled group of extensions. The result is always exactly
//! [`CLIENT_HELLO_LEN`] bytes, padded with a padding extension.
//!
//! The 32-byte client random doubles as an authenticator: it carries
//! HMAC-SHA256(key, hello) with the current unix time XORed into its last
//! four bytes, so the peer can recognise the client and check freshness.

use crate::buffer::put_length;
use crate::crypto::{generate_key_share, hmac_sha256, random_bytes};
use crate::protocol::{ProtocolError, CLIENT_HELLO_LEN, HELLO_DIGEST_LEN, LENGTH_SIZE};
use crate::unixtime;
use rand::seq::SliceRandom;

/// Number of GREASE values drawn per hello
const MAX_GREASE: usize = 8;

/// One element of the hello template
#[derive(Debug, Clone)]
enum Block {
    /// Literal bytes
    Bytes(&'static [u8]),
    /// Run of zero bytes; the first 32-byte run receives the digest
    Zero(usize),
    /// Two copies of the GREASE value with this index
    Grease(usize),
    /// Run of random bytes
    Random(usize),
    /// The SNI domain from the secret
    Domain,
    /// A fresh X25519 public key
    PublicKey,
    /// Nested blocks prefixed with their big-endian u16 length
    Scope(Vec<Block>),
    /// Groups written in random order
    Permutation(Vec<Vec<Block>>),
}

fn client_hello_rules() -> Vec<Block> {
    use Block::*;

    vec![
        Bytes(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03"),
        Zero(32),
        Bytes(b"\x20"),
        Random(32),
        Bytes(b"\x00\x20"),
        Grease(0),
        Bytes(
            b"\x13\x01\x13\x02\x13\x03\xc0\x2b\xc0\x2f\xc0\x2c\xc0\x30\xcc\xa9\
              \xcc\xa8\xc0\x13\xc0\x14\x00\x9c\x00\x9d\x00\x2f\x00\x35\x01\x00\
              \x01\x93",
        ),
        Grease(2),
        Bytes(b"\x00\x00"),
        Permutation(vec![
            // server_name
            vec![
                Bytes(b"\x00\x00"),
                Scope(vec![Scope(vec![Bytes(b"\x00"), Scope(vec![Domain])])]),
            ],
            // status_request
            vec![Bytes(b"\x00\x05\x00\x05\x01\x00\x00\x00\x00")],
            // supported_groups
            vec![
                Bytes(b"\x00\x0a\x00\x0a\x00\x08"),
                Grease(4),
                Bytes(b"\x00\x1d\x00\x17\x00\x18"),
            ],
            // ec_point_formats
            vec![Bytes(b"\x00\x0b\x00\x02\x01\x00")],
            // signature_algorithms
            vec![Bytes(
                b"\x00\x0d\x00\x12\x00\x10\x04\x03\x08\x04\x04\x01\x05\x03\
                  \x08\x05\x05\x01\x08\x06\x06\x01",
            )],
            // alpn: h2, http/1.1
            vec![Bytes(
                b"\x00\x10\x00\x0e\x00\x0c\x02\x68\x32\x08\x68\x74\x74\x70\
                  \x2f\x31\x2e\x31",
            )],
            // signed_certificate_timestamp
            vec![Bytes(b"\x00\x12\x00\x00")],
            // extended_master_secret
            vec![Bytes(b"\x00\x17\x00\x00")],
            // compress_certificate
            vec![Bytes(b"\x00\x1b\x00\x03\x02\x00\x02")],
            // session_ticket
            vec![Bytes(b"\x00\x23\x00\x00")],
            // supported_versions
            vec![
                Bytes(b"\x00\x2b\x00\x07\x06"),
                Grease(6),
                Bytes(b"\x03\x04\x03\x03"),
            ],
            // psk_key_exchange_modes
            vec![Bytes(b"\x00\x2d\x00\x02\x01\x01")],
            // key_share
            vec![
                Bytes(b"\x00\x33\x00\x2b\x00\x29"),
                Grease(4),
                Bytes(b"\x00\x01\x00\x00\x1d\x00\x20"),
                PublicKey,
            ],
            // application_settings
            vec![Bytes(b"\x44\x69\x00\x05\x00\x03\x02\x68\x32")],
            // renegotiation_info
            vec![Bytes(b"\xff\x01\x00\x01\x00")],
        ]),
        Grease(3),
        Bytes(b"\x00\x01\x00\x00\x15"),
    ]
}

/// A generated hello and the digest embedded in it
#[derive(Debug, Clone)]
pub struct ClientHello {
    /// Bytes to put on the wire
    pub data: Vec<u8>,
    /// Client random as sent, needed to verify the server's answer
    pub digest: [u8; HELLO_DIGEST_LEN],
}

fn generation_error(what: impl Into<String>) -> ProtocolError {
    ProtocolError::HelloGeneration(what.into())
}

/// Draw GREASE values, keeping adjacent pairs distinct
fn prepare_greases() -> Result<[u8; MAX_GREASE], ProtocolError> {
    let mut result = [0u8; MAX_GREASE];
    random_bytes(&mut result).map_err(|e| generation_error(e.to_string()))?;
    for byte in result.iter_mut() {
        *byte = (*byte & 0xF0) + 0x0A;
    }
    for i in (0..MAX_GREASE).step_by(2) {
        if result[i] == result[i + 1] {
            result[i + 1] ^= 0x10;
        }
    }
    Ok(result)
}

struct HelloWriter<'a> {
    domain: &'a [u8],
    greases: &'a [u8; MAX_GREASE],
    out: Vec<u8>,
    digest_position: Option<usize>,
}

impl<'a> HelloWriter<'a> {
    fn new(domain: &'a [u8], greases: &'a [u8; MAX_GREASE]) -> Self {
        Self {
            domain,
            greases,
            out: Vec::with_capacity(CLIENT_HELLO_LEN),
            digest_position: None,
        }
    }

    fn grow(&mut self, size: usize) -> Result<&mut [u8], ProtocolError> {
        let offset = self.out.len();
        if offset + size > CLIENT_HELLO_LEN {
            return Err(generation_error(format!(
                "hello overflow at {} + {}",
                offset, size
            )));
        }
        self.out.resize(offset + size, 0);
        Ok(&mut self.out[offset..])
    }

    fn write_blocks(&mut self, blocks: &[Block]) -> Result<(), ProtocolError> {
        blocks.iter().try_for_each(|block| self.write_block(block))
    }

    fn write_block(&mut self, block: &Block) -> Result<(), ProtocolError> {
        match block {
            Block::Bytes(bytes) => {
                self.grow(bytes.len())?.copy_from_slice(bytes);
            }
            Block::Zero(length) => {
                let offset = self.out.len();
                self.grow(*length)?;
                if *length == HELLO_DIGEST_LEN && self.digest_position.is_none() {
                    self.digest_position = Some(offset);
                }
            }
            Block::Grease(seed) => {
                let value = *self
                    .greases
                    .get(*seed)
                    .ok_or_else(|| generation_error(format!("grease seed {}", seed)))?;
                self.grow(2)?.fill(value);
            }
            Block::Random(length) => {
                let storage = self.grow(*length)?;
                random_bytes(storage).map_err(|e| generation_error(e.to_string()))?;
            }
            Block::Domain => {
                let domain = self.domain;
                self.grow(domain.len())?.copy_from_slice(domain);
            }
            Block::PublicKey => {
                let key = generate_key_share().map_err(|e| generation_error(e.to_string()))?;
                self.grow(key.len())?.copy_from_slice(&key);
            }
            Block::Scope(inner) => {
                let position = self.out.len();
                self.grow(LENGTH_SIZE)?;
                self.write_blocks(inner)?;
                let length = self.out.len() - position - LENGTH_SIZE;
                put_length(&mut self.out[position..], length);
            }
            Block::Permutation(groups) => {
                let mut parts = Vec::with_capacity(groups.len());
                for group in groups {
                    let mut part = HelloWriter::new(self.domain, self.greases);
                    part.write_blocks(group)?;
                    parts.push(part.out);
                }
                parts.shuffle(&mut rand::thread_rng());
                for part in parts {
                    self.grow(part.len())?.copy_from_slice(&part);
                }
            }
        }
        Ok(())
    }

    fn finalize(mut self, key: &[u8]) -> Result<ClientHello, ProtocolError> {
        let position = self
            .digest_position
            .ok_or_else(|| generation_error("no digest position"))?;

        let padding = CLIENT_HELLO_LEN
            .checked_sub(LENGTH_SIZE + self.out.len())
            .ok_or_else(|| generation_error("no room for padding"))?;
        self.write_block(&Block::Scope(vec![Block::Zero(padding)]))?;

        let digest = hmac_sha256(key, &self.out);
        let field = &mut self.out[position..position + HELLO_DIGEST_LEN];
        field.copy_from_slice(&digest);

        let timestamp = (unixtime::now() as i32).to_le_bytes();
        for (byte, stamp) in field[HELLO_DIGEST_LEN - 4..].iter_mut().zip(timestamp) {
            *byte ^= stamp;
        }

        let mut sent = [0u8; HELLO_DIGEST_LEN];
        sent.copy_from_slice(field);
        Ok(ClientHello {
            data: self.out,
            digest: sent,
        })
    }
}

/// Build a ClientHello for `domain` authenticated with `key`
pub fn generate_client_hello(domain: &[u8], key: &[u8]) -> Result<ClientHello, ProtocolError> {
    let greases = prepare_greases()?;
    let mut writer = HelloWriter::new(domain, &greases);
    writer.write_blocks(&client_hello_rules())?;
    writer.finalize(key)
}
