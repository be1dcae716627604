//! Wire constants for the WebTransport-over-HTTP/3 framing layer.
//!
//! All numeric codepoints are collected here to avoid magic numbers
//! scattered across the codebase. Values come from the IANA registries
//! referenced by draft-ietf-webtrans-http3 and RFC 9297.

// ---------------------------------------------------------------------------
// HTTP/3 SETTINGS parameters
// ---------------------------------------------------------------------------

/// HTTP/3 datagram support (RFC 9297 §2.1.1).
pub const SETTINGS_H3_DATAGRAM: u64 = 0x33;

/// WebTransport support advertised by the endpoint.
pub const SETTINGS_ENABLE_WEBTRANSPORT: u64 = 0x2b60_3742;

// ---------------------------------------------------------------------------
// WebTransport data stream types
// ---------------------------------------------------------------------------

/// Leading tag of a unidirectional WebTransport data stream.
pub const WT_STREAM_TYPE_UNI: u64 = 0x54;

/// Leading tag of a bidirectional WebTransport data stream.
pub const WT_STREAM_TYPE_BIDI: u64 = 0x41;

// ---------------------------------------------------------------------------
// Capsule types
// ---------------------------------------------------------------------------

/// Close the WebTransport session with an error code and message.
pub const CAPSULE_CLOSE_SESSION: u64 = 0x2843;

// ---------------------------------------------------------------------------
// HTTP/3 error codes used when resetting streams
// ---------------------------------------------------------------------------

/// Data stream aborted because its session is gone.
pub const WT_SESSION_GONE: u64 = 0x170d_7b68;

/// Data stream rejected before it could be associated with a session.
pub const WT_BUFFERED_STREAM_REJECTED: u64 = 0x3994_bd84;
