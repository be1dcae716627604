//! Datagram codec: `varint(session_id) || payload`.
//!
//! QUIC datagrams are connection-scoped; the session-id prefix is the only
//! multiplexing mechanism. Each call is independent and stateless — no
//! ordering or delivery guarantee is added on top of what the transport
//! gives, which is none.

use crate::error::{Error, Result};
use crate::varint;

/// Prepend the session-id prefix to `payload`.
pub fn encode(session_id: u64, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(varint::varint_len(session_id) + payload.len());
    let mut tmp = [0u8; 8];
    let n = varint::encode(session_id, &mut tmp)?;
    buf.extend_from_slice(&tmp[..n]);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Strip the session-id prefix, returning `(session_id, payload)`.
///
/// A datagram arrives whole or not at all, so a buffer shorter than its
/// own prefix is [`Error::Malformed`], never a suspension.
pub fn decode(data: &[u8]) -> Result<(u64, Vec<u8>)> {
    let (session_id, n) = varint::decode(data).map_err(|e| match e {
        Error::BufferTooShort => Error::Malformed("datagram shorter than session-id prefix".into()),
        other => other,
    })?;
    Ok((session_id, data[n..].to_vec()))
}
