//! Session-close capsule codec.
//!
//! The single capsule type this layer understands closes a session
//! gracefully:
//!
//! ```text
//! varint(CAPSULE_CLOSE_SESSION) || error_code: u32 BE || message: UTF-8
//! ```
//!
//! The message carries no explicit length; it runs to the end of the
//! enclosing delivery unit, so `decode` always receives the complete
//! capsule bytes.

use crate::error::{Error, Result};
use crate::varint;
use crate::wire;

/// Serialize a close capsule.
///
/// A message longer than `max_message_len` is a local programming error
/// and fails with [`Error::ValueTooLarge`]; nothing is written.
pub fn encode(error_code: u32, error_message: &str, max_message_len: usize) -> Result<Vec<u8>> {
    if error_message.len() > max_message_len {
        return Err(Error::ValueTooLarge);
    }
    let mut buf = Vec::with_capacity(2 + 4 + error_message.len());
    let mut tmp = [0u8; 8];
    let n = varint::encode(wire::CAPSULE_CLOSE_SESSION, &mut tmp)?;
    buf.extend_from_slice(&tmp[..n]);
    buf.extend_from_slice(&error_code.to_be_bytes());
    buf.extend_from_slice(error_message.as_bytes());
    Ok(buf)
}

/// Parse a complete close capsule, returning `(error_code, error_message)`.
///
/// With `lenient_utf8` set, invalid UTF-8 in the message is replaced with
/// U+FFFD instead of failing the capsule; this is the one documented case
/// where malformed input is tolerated.
pub fn decode(data: &[u8], lenient_utf8: bool, max_message_len: usize) -> Result<(u32, String)> {
    let (capsule_type, n) = varint::decode(data).map_err(short_is_malformed)?;
    if capsule_type != wire::CAPSULE_CLOSE_SESSION {
        return Err(Error::Malformed(format!(
            "unknown capsule type {capsule_type:#x}"
        )));
    }
    let rest = &data[n..];
    if rest.len() < 4 {
        return Err(Error::Malformed(
            "close capsule truncated before error code".into(),
        ));
    }
    let error_code = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let msg_bytes = &rest[4..];
    if msg_bytes.len() > max_message_len {
        return Err(Error::Malformed("close message too long".into()));
    }
    let error_message = if lenient_utf8 {
        String::from_utf8_lossy(msg_bytes).into_owned()
    } else {
        String::from_utf8(msg_bytes.to_vec())
            .map_err(|_| Error::Malformed("close message is not valid UTF-8".into()))?
    };
    Ok((error_code, error_message))
}

fn short_is_malformed(e: Error) -> Error {
    match e {
        Error::BufferTooShort => Error::Malformed("capsule shorter than its type tag".into()),
        other => other,
    }
}
