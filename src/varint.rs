//! QUIC variable-length integer codec (RFC 9000 §16).
//!
//! The two most-significant bits of the first byte select the length
//! class: `00` = 1 byte, `01` = 2, `10` = 4, `11` = 8. The remaining
//! bits carry the value big-endian, giving a 62-bit usable range.
//!
//! Every length, session id and stream-type tag on the wire uses this
//! encoding.

use crate::error::{Error, Result};

/// Maximum value representable as a QUIC varint.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Number of bytes the minimal encoding of `v` occupies.
pub const fn varint_len(v: u64) -> usize {
    if v <= 63 {
        1
    } else if v <= 16383 {
        2
    } else if v <= 1_073_741_823 {
        4
    } else {
        8
    }
}

/// Encode `v` into `buf` using the minimal length class, returning the
/// number of bytes written.
///
/// Returns [`Error::ValueTooLarge`] if `v` exceeds [`MAX_VARINT`] and
/// [`Error::BufferTooShort`] if `buf` cannot hold the encoding.
pub fn encode(v: u64, buf: &mut [u8]) -> Result<usize> {
    if v > MAX_VARINT {
        return Err(Error::ValueTooLarge);
    }
    let len = varint_len(v);
    if buf.len() < len {
        return Err(Error::BufferTooShort);
    }
    for (i, b) in buf[..len].iter_mut().enumerate() {
        *b = (v >> ((len - 1 - i) * 8)) as u8;
    }
    match len {
        1 => {}
        2 => buf[0] |= 0x40,
        4 => buf[0] |= 0x80,
        _ => buf[0] |= 0xc0,
    }
    Ok(len)
}

/// Encode `v` into a fresh `Vec<u8>`.
pub fn encode_vec(v: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; varint_len(v)];
    encode(v, &mut buf)?;
    Ok(buf)
}

/// Decode a varint from the start of `buf`, returning `(value, consumed)`.
///
/// Returns [`Error::BufferTooShort`] if `buf` holds fewer bytes than the
/// length class announced by the first byte.
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    if buf.is_empty() {
        return Err(Error::BufferTooShort);
    }
    let len = 1usize << (buf[0] >> 6);
    if buf.len() < len {
        return Err(Error::BufferTooShort);
    }
    let mut v = (buf[0] as u64) & 0x3f;
    for &b in &buf[1..len] {
        v = (v << 8) | (b as u64);
    }
    Ok((v, len))
}

/// Incremental decoder for a single varint, fed one byte at a time.
///
/// Stream prefixes can arrive split at arbitrary boundaries; this holds
/// the partial-parse state between deliveries.
#[derive(Debug, Clone, Default)]
pub struct VarintDecoder {
    value: u64,
    /// Total length announced by the first byte (0 = no byte seen yet).
    expected_len: usize,
    consumed: usize,
}

impl VarintDecoder {
    pub const fn new() -> Self {
        Self {
            value: 0,
            expected_len: 0,
            consumed: 0,
        }
    }

    /// Feed one byte. Returns `Some((value, total_bytes))` once the varint
    /// is complete, `None` while more bytes are needed.
    pub fn feed(&mut self, byte: u8) -> Option<(u64, usize)> {
        if self.consumed == 0 {
            self.expected_len = 1usize << (byte >> 6);
            self.value = (byte as u64) & 0x3f;
        } else {
            self.value = (self.value << 8) | (byte as u64);
        }
        self.consumed += 1;
        if self.consumed == self.expected_len {
            Some((self.value, self.consumed))
        } else {
            None
        }
    }
}
