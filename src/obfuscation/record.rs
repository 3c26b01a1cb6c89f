//! Outbound application-data record framing

use crate::protocol::{CLIENT_HEADER, CLIENT_PART_SIZE, CLIENT_PREFIX, RECORD_HEADER_SIZE};
use bytes::{Buf, BufMut, BytesMut};

/// Wrap `prefix` followed by `payload` into TLS application-data records
///
/// A non-empty prefix marks the first write of a connection: it is preceded
/// by a ChangeCipherSpec record and travels in the same record as the first
/// payload chunk. The two are framed as one stream, so each record carries
/// at most [`CLIENT_PART_SIZE`] bytes however long the prefix is.
pub fn frame_client_records(prefix: &[u8], payload: &[u8]) -> BytesMut {
    let mut data = prefix.chain(payload);
    let records = data.remaining() / CLIENT_PART_SIZE + 1;
    let mut out = BytesMut::with_capacity(
        CLIENT_PREFIX.len() + data.remaining() + records * RECORD_HEADER_SIZE,
    );

    if !prefix.is_empty() {
        out.put_slice(CLIENT_PREFIX);
    }
    loop {
        let chunk = data.remaining().min(CLIENT_PART_SIZE);
        out.put_slice(CLIENT_HEADER);
        out.put_u16(chunk as u16);
        out.put((&mut data).take(chunk));

        if !data.has_remaining() {
            break;
        }
    }
    out
}
