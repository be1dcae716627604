//! Extended-CONNECT handshake recognizer.
//!
//! Header compression is handled by the surrounding HTTP/3 layer, so this
//! module works on decoded header lists. Per bidirectional stream the
//! recognizer moves `AwaitingHeaders -> Established | Rejected`; a stream
//! that is not a WebTransport CONNECT (wrong method, wrong protocol token
//! or a path the configuration does not accept) is handed back to ordinary
//! HTTP handling untouched.

use std::collections::HashMap;

use crate::config::{Config, PeerSettings};
use crate::error::{Error, Result};

/// Pseudo-header values that identify a WebTransport CONNECT.
const METHOD_CONNECT: &str = "CONNECT";
const PROTOCOL_WEBTRANSPORT: &str = "webtransport";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHeaders,
    Established,
    Rejected,
}

/// What the engine should do with a header frame it just inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A WebTransport CONNECT on an acceptable path. Write `response`
    /// (a 200-class header list) on the stream; the session is usable once
    /// the write is confirmed.
    Accepted {
        session_id: u64,
        response: Vec<(String, String)>,
    },
    /// Not WebTransport traffic. The stream and all its future bytes
    /// belong to ordinary HTTP handling; this layer produces nothing for it.
    PassThrough,
    /// A WebTransport CONNECT that cannot be honoured. Write `response`
    /// (an HTTP error header list) and do not create a session.
    Rejected {
        error: Error,
        response: Vec<(String, String)>,
    },
}

#[derive(Debug, Default)]
pub struct Recognizer {
    states: HashMap<u64, HandshakeState>,
}

impl Recognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the first header frame of a bidirectional stream.
    ///
    /// A second header frame on an established control stream is a
    /// [`Error::ProtocolViolation`]; on a rejected stream it is ordinary
    /// HTTP traffic and passes through.
    pub fn inspect(
        &mut self,
        stream_id: u64,
        headers: &[(String, String)],
        config: &Config,
        peer: &PeerSettings,
    ) -> Result<ConnectOutcome> {
        match self.states.get(&stream_id) {
            Some(HandshakeState::Established) => {
                return Err(Error::ProtocolViolation(format!(
                    "second CONNECT on established control stream {stream_id}"
                )));
            }
            Some(HandshakeState::Rejected) => return Ok(ConnectOutcome::PassThrough),
            Some(HandshakeState::AwaitingHeaders) | None => {}
        }

        let method = pseudo_header(headers, ":method");
        let protocol = pseudo_header(headers, ":protocol");
        let path = pseudo_header(headers, ":path").unwrap_or("");

        let is_wt_connect =
            method == Some(METHOD_CONNECT) && protocol == Some(PROTOCOL_WEBTRANSPORT);

        if !is_wt_connect || !config.path_acceptable(path) {
            self.states.insert(stream_id, HandshakeState::Rejected);
            return Ok(ConnectOutcome::PassThrough);
        }

        if !peer.supports_webtransport() {
            self.states.insert(stream_id, HandshakeState::Rejected);
            return Ok(ConnectOutcome::Rejected {
                error: Error::CapabilityUnsupported,
                response: response_headers(400),
            });
        }

        self.states.insert(stream_id, HandshakeState::Established);
        Ok(ConnectOutcome::Accepted {
            session_id: stream_id,
            response: response_headers(200),
        })
    }

    pub fn state(&self, stream_id: u64) -> Option<HandshakeState> {
        self.states.get(&stream_id).copied()
    }

    /// Forget a stream, e.g. after reset.
    pub fn remove(&mut self, stream_id: u64) {
        self.states.remove(&stream_id);
    }
}

/// Build the header list for an outbound extended-CONNECT request.
pub fn request_headers(authority: &str, path: &str) -> Vec<(String, String)> {
    vec![
        (":method".into(), METHOD_CONNECT.into()),
        (":protocol".into(), PROTOCOL_WEBTRANSPORT.into()),
        (":scheme".into(), "https".into()),
        (":authority".into(), authority.into()),
        (":path".into(), path.into()),
    ]
}

/// Build a minimal response header list.
pub fn response_headers(status: u16) -> Vec<(String, String)> {
    vec![(":status".into(), status.to_string())]
}

/// The `:status` of a response header list, if present and numeric.
pub fn response_status(headers: &[(String, String)]) -> Option<u16> {
    pseudo_header(headers, ":status").and_then(|s| s.parse().ok())
}

fn pseudo_header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
