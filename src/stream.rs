//! Per-stream codec for WebTransport data streams.
//!
//! Every data stream starts with `varint(stream_type) || varint(session_id)`
//! and carries raw payload for the rest of its life. The prefix can arrive
//! split at any byte boundary, so each stream holds incremental decoder
//! state until the prefix is complete.

use crate::error::{Error, Result};
use crate::frame::Direction;
use crate::varint;
use crate::wire;

/// Lifecycle of one data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Buffering until the stream-type and session-id varints are complete.
    ReadingPrefix,
    /// Prefix consumed; payload bytes are relayed as-is.
    Relaying,
    /// End-of-stream seen (or reset). Nothing further is relayed.
    Closed,
}

/// Parse progress within the two-varint prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefixPhase {
    StreamType,
    SessionId,
}

#[derive(Debug, Clone)]
pub struct DataStream {
    pub quic_stream_id: u64,
    pub session_id: u64,
    pub direction: Direction,
    pub state: StreamState,
    phase: PrefixPhase,
    type_decoder: varint::VarintDecoder,
    session_decoder: varint::VarintDecoder,
}

impl DataStream {
    /// A stream opened by the peer; the prefix is still on the wire.
    pub fn new_incoming(quic_stream_id: u64, direction: Direction) -> Self {
        Self {
            quic_stream_id,
            session_id: 0,
            direction,
            state: StreamState::ReadingPrefix,
            phase: PrefixPhase::StreamType,
            type_decoder: varint::VarintDecoder::new(),
            session_decoder: varint::VarintDecoder::new(),
        }
    }

    /// A locally opened stream; the caller writes the prefix itself, so
    /// the stream starts out relaying.
    pub fn new_outgoing(quic_stream_id: u64, session_id: u64, direction: Direction) -> Self {
        Self {
            quic_stream_id,
            session_id,
            direction,
            state: StreamState::Relaying,
            phase: PrefixPhase::StreamType,
            type_decoder: varint::VarintDecoder::new(),
            session_decoder: varint::VarintDecoder::new(),
        }
    }

    /// Consume prefix bytes from `data`, returning how many were used.
    /// Bytes past the prefix belong to the application payload.
    ///
    /// Transitions to `Relaying` once both varints are complete. A
    /// stream-type tag that is not the one expected for this stream's
    /// direction fails with [`Error::Malformed`]; the stream must then be
    /// reset, not relayed.
    pub fn consume_prefix(&mut self, data: &[u8]) -> Result<usize> {
        debug_assert_eq!(self.state, StreamState::ReadingPrefix);
        let mut consumed = 0;

        for &byte in data {
            consumed += 1;
            match self.phase {
                PrefixPhase::StreamType => {
                    if let Some((tag, _)) = self.type_decoder.feed(byte) {
                        let expected = expected_tag(self.direction);
                        if tag != expected {
                            return Err(Error::Malformed(format!(
                                "stream type {tag:#x}, expected {expected:#x}"
                            )));
                        }
                        self.phase = PrefixPhase::SessionId;
                    }
                }
                PrefixPhase::SessionId => {
                    if let Some((sid, _)) = self.session_decoder.feed(byte) {
                        self.session_id = sid;
                        self.state = StreamState::Relaying;
                        return Ok(consumed);
                    }
                }
            }
        }

        Ok(consumed)
    }

    pub fn is_relaying(&self) -> bool {
        self.state == StreamState::Relaying
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Mark the stream closed, dropping any partial prefix state.
    /// Returns false if it was already closed (closure is idempotent).
    pub fn close(&mut self) -> bool {
        if self.state == StreamState::Closed {
            return false;
        }
        self.state = StreamState::Closed;
        true
    }
}

const fn expected_tag(direction: Direction) -> u64 {
    match direction {
        Direction::Unidirectional => wire::WT_STREAM_TYPE_UNI,
        Direction::Bidirectional => wire::WT_STREAM_TYPE_BIDI,
    }
}

/// Encode the `stream_type || session_id` prefix for a locally opened
/// stream. Must be written exactly once, before any payload.
pub fn encode_prefix(session_id: u64, direction: Direction) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(2 + varint::varint_len(session_id));
    let mut tmp = [0u8; 8];
    let n = varint::encode(expected_tag(direction), &mut tmp)?;
    buf.extend_from_slice(&tmp[..n]);
    let n = varint::encode(session_id, &mut tmp)?;
    buf.extend_from_slice(&tmp[..n]);
    Ok(buf)
}

/// True if the QUIC stream id names a bidirectional stream.
pub const fn is_bidi(stream_id: u64) -> bool {
    stream_id & 0x02 == 0
}

/// True if the QUIC stream id names a client-initiated stream.
pub const fn is_client_initiated(stream_id: u64) -> bool {
    stream_id & 0x01 == 0
}
