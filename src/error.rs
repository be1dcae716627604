use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // -- framing ----------------------------------------------------------------
    /// Not enough bytes yet. This is the suspension signal for incremental
    /// parsers; terminal decoders (datagram, capsule) never surface it and
    /// report [`Error::Malformed`] instead.
    #[error("buffer too short")]
    BufferTooShort,

    /// Bytes do not conform to the expected prefix or capsule shape.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Local encode attempted a value outside the 62-bit varint range.
    #[error("value exceeds maximum varint value (2^62 - 1)")]
    ValueTooLarge,

    // -- WebTransport protocol --------------------------------------------------
    /// Peer SETTINGS lack the datagram or WebTransport capability flag.
    #[error("peer does not advertise WebTransport support")]
    CapabilityUnsupported,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("session not found: {0}")]
    SessionNotFound(u64),

    #[error("session already closed")]
    SessionClosed,

    #[error("stream not found: {0}")]
    StreamNotFound(u64),
}
