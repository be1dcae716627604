//! Sans-io engine for WebTransport session establishment and framing over
//! HTTP/3 and QUIC.
//!
//! The crate performs no I/O and spawns no tasks. The surrounding
//! transport feeds decoded header lists, SETTINGS pairs, stream bytes and
//! datagrams into a [`Connection`]; the engine demultiplexes them into
//! [`Frame`] values and returns the bytes or header lists the transport
//! must write. One [`Connection`] per QUIC connection, driven from a
//! single thread or behind the caller's own synchronization.

pub mod capsule;
pub mod config;
pub mod connection;
pub mod datagram;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod session;
pub mod stream;
pub mod varint;
pub mod wire;

pub use config::{Config, PeerSettings};
pub use connection::{CloseSessionResult, Connection};
pub use error::Error;
pub use frame::{Direction, Frame};
pub use handshake::ConnectOutcome;
pub use session::SessionState;
