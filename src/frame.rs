//! The application-facing frame model.
//!
//! Everything the engine hands upward is one of these variants; everything
//! the application wants sent goes through the [`Connection`] operations
//! that encode the matching wire shape. Consumers are expected to match
//! exhaustively so a new frame kind is a compile-time-checked change.
//!
//! [`Connection`]: crate::connection::Connection

/// Direction of a WebTransport data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unidirectional,
    Bidirectional,
}

/// One unit of WebTransport traffic, demultiplexed and stripped of its
/// wire prefix.
///
/// Every frame carries its owning session id directly or implies it
/// through the stream id (resolvable via
/// [`Connection::stream_session`](crate::connection::Connection::stream_session)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An unreliable, unordered datagram scoped to a session.
    Datagram { session_id: u64, payload: Vec<u8> },

    /// A new data stream finished its prefix and is now relaying.
    /// Emitted exactly once per stream.
    StreamOpen { stream_id: u64, direction: Direction },

    /// One ordered segment of stream payload.
    StreamData { stream_id: u64, payload: Vec<u8> },

    /// The transport signalled end-of-stream. Emitted exactly once.
    StreamClose { stream_id: u64 },

    /// The session was closed by a capsule, control-stream termination or
    /// handshake rejection.
    SessionClose {
        session_id: u64,
        error_code: u32,
        error_message: String,
    },
}

impl Frame {
    /// The session this frame belongs to, when it carries one explicitly.
    pub fn session_id(&self) -> Option<u64> {
        match self {
            Frame::Datagram { session_id, .. } | Frame::SessionClose { session_id, .. } => {
                Some(*session_id)
            }
            Frame::StreamOpen { .. } | Frame::StreamData { .. } | Frame::StreamClose { .. } => None,
        }
    }
}
