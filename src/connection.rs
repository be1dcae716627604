//! The per-connection WebTransport engine.
//!
//! Sans-io: the surrounding transport feeds decoded header lists, stream
//! bytes, stream-lifecycle signals and datagrams in; the engine queues
//! [`Frame`] values for the application and returns the bytes or header
//! lists the transport must write. Every call runs to completion on the
//! caller's thread; the transport is expected to serialize delivery per
//! connection, so there is no internal locking.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::capsule;
use crate::config::{Config, PeerSettings};
use crate::datagram;
use crate::error::{Error, Result};
use crate::frame::{Direction, Frame};
use crate::handshake::{self, ConnectOutcome, Recognizer};
use crate::session::{Session, SessionState};
use crate::stream::{self, DataStream, StreamState};
use crate::varint;
use crate::wire;

/// What the caller must do after [`Connection::close_session`]: write the
/// capsule on the control stream, then reset the listed data streams.
#[derive(Debug, PartialEq)]
pub struct CloseSessionResult {
    pub capsule: Vec<u8>,
    pub streams_to_reset: Vec<u64>,
    pub reset_error_code: u64,
}

pub struct Connection {
    is_server: bool,
    config: Config,
    recognizer: Recognizer,
    peer_settings: PeerSettings,

    sessions: HashMap<u64, Session>,
    control_to_session: HashMap<u64, u64>,
    stream_to_session: HashMap<u64, u64>,
    streams: HashMap<u64, DataStream>,

    frames: VecDeque<Frame>,
}

impl Connection {
    pub fn new(is_server: bool, config: Config) -> Self {
        Self {
            is_server,
            config,
            recognizer: Recognizer::new(),
            peer_settings: PeerSettings::default(),
            sessions: HashMap::new(),
            control_to_session: HashMap::new(),
            stream_to_session: HashMap::new(),
            streams: HashMap::new(),
            frames: VecDeque::new(),
        }
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Next frame for the application, in emission order.
    pub fn poll_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// The SETTINGS pairs the transport must advertise for this endpoint.
    pub fn local_settings(&self) -> Vec<(u64, u64)> {
        self.config.h3_settings()
    }

    /// Record the peer's negotiated SETTINGS, as delivered by the H3 layer.
    pub fn on_peer_settings(&mut self, raw: &[(u64, u64)]) {
        self.peer_settings = PeerSettings::from_raw(raw);
        debug!(settings = ?self.peer_settings, "peer settings received");
    }

    pub fn peer_supports_webtransport(&self) -> bool {
        self.peer_settings.supports_webtransport()
    }

    // -----------------------------------------------------------------------
    // Handshake — server side
    // -----------------------------------------------------------------------

    /// Inspect the first header frame of a peer-opened bidirectional
    /// stream. On [`ConnectOutcome::Accepted`] a session exists in
    /// `Pending`; confirm the response write with [`Connection::response_sent`].
    pub fn on_request_headers(
        &mut self,
        stream_id: u64,
        headers: &[(String, String)],
    ) -> Result<ConnectOutcome> {
        if !self.is_server {
            return Err(Error::ProtocolViolation(
                "request headers on a client connection".into(),
            ));
        }

        let outcome = self
            .recognizer
            .inspect(stream_id, headers, &self.config, &self.peer_settings)?;

        match &outcome {
            ConnectOutcome::Accepted { session_id, .. } => {
                let find = |name: &str| {
                    headers
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                let mut session = Session::new(*session_id);
                session.authority = find(":authority");
                session.path = find(":path");
                debug!(session_id, path = %session.path, "webtransport session pending");
                self.sessions.insert(*session_id, session);
                self.control_to_session.insert(stream_id, *session_id);
            }
            ConnectOutcome::Rejected { error, .. } => {
                warn!(stream_id, %error, "rejecting CONNECT");
            }
            ConnectOutcome::PassThrough => {}
        }

        Ok(outcome)
    }

    /// Confirm the 200-class response headers were written; the session
    /// becomes usable.
    pub fn response_sent(&mut self, session_id: u64) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.state != SessionState::Pending {
            return Err(Error::ProtocolViolation(format!(
                "session {session_id} is not awaiting a response"
            )));
        }
        session.state = SessionState::Open;
        debug!(session_id, "webtransport session open");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handshake — client side
    // -----------------------------------------------------------------------

    /// Start a session on a freshly opened bidirectional stream. Returns
    /// the extended-CONNECT header list to send on it.
    pub fn connect(
        &mut self,
        control_stream_id: u64,
        authority: &str,
        path: &str,
    ) -> Result<Vec<(String, String)>> {
        if self.is_server {
            return Err(Error::ProtocolViolation(
                "server cannot initiate CONNECT".into(),
            ));
        }
        if !self.peer_settings.supports_webtransport() {
            return Err(Error::CapabilityUnsupported);
        }
        if self.sessions.contains_key(&control_stream_id) {
            return Err(Error::ProtocolViolation(format!(
                "stream {control_stream_id} already carries a session"
            )));
        }

        let mut session = Session::new(control_stream_id);
        session.authority = authority.to_string();
        session.path = path.to_string();
        self.sessions.insert(control_stream_id, session);
        self.control_to_session
            .insert(control_stream_id, control_stream_id);
        debug!(session_id = control_stream_id, path, "connect sent");

        Ok(handshake::request_headers(authority, path))
    }

    /// Process the response header frame on a client control stream. A
    /// 200-class status opens the session; anything else closes it and
    /// emits a [`Frame::SessionClose`].
    pub fn on_response_headers(
        &mut self,
        stream_id: u64,
        headers: &[(String, String)],
    ) -> Result<()> {
        if self.is_server {
            return Err(Error::ProtocolViolation(
                "response headers on a server connection".into(),
            ));
        }
        let session_id = *self
            .control_to_session
            .get(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.state != SessionState::Pending {
            return Err(Error::ProtocolViolation(format!(
                "response on non-pending session {session_id}"
            )));
        }

        let status = handshake::response_status(headers).unwrap_or(0);
        if (200..300).contains(&status) {
            session.state = SessionState::Open;
            debug!(session_id, status, "webtransport session open");
        } else {
            warn!(session_id, status, "connect rejected by server");
            self.terminate_session(session_id, 0, format!("connect rejected: status {status}"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound stream bytes
    // -----------------------------------------------------------------------

    /// Feed ordered bytes delivered on a QUIC stream. `fin` marks the
    /// transport's end-of-stream signal for this delivery.
    ///
    /// Data-stream bytes may be split at any boundary. Control-stream
    /// bytes carry capsules, whose message has no explicit length: it is
    /// bounded by the delivery unit that completes the capsule's type tag
    /// and error code. Only those leading header bytes are buffered across
    /// deliveries, so the transport must hand over the message bytes in
    /// the same call that completes the header (e.g. one HTTP/3 DATA
    /// frame's worth of payload per call).
    pub fn on_stream_data(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<()> {
        if let Some(&session_id) = self.control_to_session.get(&stream_id) {
            return self.on_control_stream_data(session_id, data, fin);
        }

        if !self.streams.contains_key(&stream_id) {
            let direction = if stream::is_bidi(stream_id) {
                Direction::Bidirectional
            } else {
                Direction::Unidirectional
            };
            self.streams
                .insert(stream_id, DataStream::new_incoming(stream_id, direction));
        }

        let mut offset = 0;
        {
            let st = self.streams.get_mut(&stream_id).expect("stream exists");
            match st.state {
                StreamState::Closed => {
                    if !data.is_empty() {
                        warn!(stream_id, "ignoring bytes after stream close");
                        return Err(Error::ProtocolViolation(format!(
                            "data on closed stream {stream_id}"
                        )));
                    }
                    // Duplicate end-of-stream signal; closure is idempotent.
                    return Ok(());
                }
                StreamState::ReadingPrefix => {
                    match st.consume_prefix(data) {
                        Ok(n) => offset = n,
                        Err(e) => {
                            st.close();
                            warn!(stream_id, %e, "stream prefix malformed, stream must be reset");
                            return Err(e);
                        }
                    }
                    if st.state == StreamState::ReadingPrefix {
                        if fin {
                            // Cancelled mid-prefix: drop parse state, no error.
                            st.close();
                        }
                        return Ok(());
                    }
                }
                StreamState::Relaying => {}
            }
        }

        // Newly completed prefix: bind the stream to its session.
        if !self.stream_to_session.contains_key(&stream_id) {
            let (session_id, direction) = {
                let st = &self.streams[&stream_id];
                (st.session_id, st.direction)
            };
            match self.sessions.get_mut(&session_id) {
                Some(session) if !session.is_closed() => {
                    session.register_stream(stream_id);
                }
                Some(_) => {
                    self.streams.get_mut(&stream_id).expect("stream exists").close();
                    warn!(stream_id, session_id, "stream for closed session");
                    return Err(Error::ProtocolViolation(format!(
                        "stream {stream_id} names closed session {session_id}"
                    )));
                }
                None => {
                    self.streams.get_mut(&stream_id).expect("stream exists").close();
                    warn!(stream_id, session_id, "stream for unknown session");
                    return Err(Error::SessionNotFound(session_id));
                }
            }
            self.stream_to_session.insert(stream_id, session_id);
            self.frames.push_back(Frame::StreamOpen {
                stream_id,
                direction,
            });
        }

        let payload = &data[offset..];
        if !payload.is_empty() {
            self.frames.push_back(Frame::StreamData {
                stream_id,
                payload: payload.to_vec(),
            });
        }
        if fin {
            self.close_data_stream(stream_id);
        }
        Ok(())
    }

    /// Transport-level stream reset/abort: an implicit close. Buffered
    /// partial-parse state is discarded without error.
    pub fn on_stream_reset(&mut self, stream_id: u64) {
        if let Some(&session_id) = self.control_to_session.get(&stream_id) {
            self.recognizer.remove(stream_id);
            self.terminate_session(session_id, 0, String::new());
            return;
        }
        self.close_data_stream(stream_id);
    }

    /// The QUIC connection itself went away: every session and stream is
    /// implicitly closed.
    pub fn on_connection_closed(&mut self) {
        let session_ids: Vec<u64> = self.sessions.keys().copied().collect();
        for session_id in session_ids {
            self.terminate_session(session_id, 0, String::new());
        }
        let stream_ids: Vec<u64> = self.streams.keys().copied().collect();
        for stream_id in stream_ids {
            self.close_data_stream(stream_id);
        }
    }

    // -----------------------------------------------------------------------
    // Datagrams
    // -----------------------------------------------------------------------

    /// Feed one received QUIC datagram.
    pub fn on_datagram(&mut self, data: &[u8]) -> Result<()> {
        let (session_id, payload) = datagram::decode(data)?;
        match self.sessions.get(&session_id) {
            Some(session) if session.is_open() => {
                self.frames.push_back(Frame::Datagram {
                    session_id,
                    payload,
                });
                Ok(())
            }
            Some(_) => {
                // Datagrams are droppable by contract; one for a pending or
                // closed session is discarded, not an error.
                warn!(session_id, "dropping datagram for inactive session");
                Ok(())
            }
            None => Err(Error::SessionNotFound(session_id)),
        }
    }

    /// Encode a datagram for an open session. The returned bytes go out
    /// as one QUIC datagram.
    pub fn send_datagram(&self, session_id: u64, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.peer_settings.h3_datagram {
            return Err(Error::CapabilityUnsupported);
        }
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.is_closed() {
            return Err(Error::SessionClosed);
        }
        if !session.is_open() {
            return Err(Error::ProtocolViolation(format!(
                "session {session_id} not open"
            )));
        }
        datagram::encode(session_id, payload)
    }

    // -----------------------------------------------------------------------
    // Outbound streams
    // -----------------------------------------------------------------------

    /// Register a locally opened QUIC stream under a session. Returns the
    /// prefix bytes that must be the stream's first write; everything the
    /// caller writes afterwards is raw payload.
    pub fn open_stream(
        &mut self,
        session_id: u64,
        quic_stream_id: u64,
        direction: Direction,
    ) -> Result<Vec<u8>> {
        if self.streams.contains_key(&quic_stream_id)
            || self.control_to_session.contains_key(&quic_stream_id)
        {
            return Err(Error::ProtocolViolation(format!(
                "stream {quic_stream_id} already in use"
            )));
        }
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.is_closed() {
            return Err(Error::SessionClosed);
        }
        if !session.is_open() {
            return Err(Error::ProtocolViolation(format!(
                "session {session_id} not open"
            )));
        }

        session.register_stream(quic_stream_id);
        self.streams.insert(
            quic_stream_id,
            DataStream::new_outgoing(quic_stream_id, session_id, direction),
        );
        self.stream_to_session.insert(quic_stream_id, session_id);
        stream::encode_prefix(session_id, direction)
    }

    // -----------------------------------------------------------------------
    // Session termination
    // -----------------------------------------------------------------------

    /// Close a session locally. The caller writes the capsule on the
    /// control stream and resets the listed data streams.
    pub fn close_session(
        &mut self,
        session_id: u64,
        error_code: u32,
        error_message: &str,
    ) -> Result<CloseSessionResult> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.is_closed() {
            return Err(Error::SessionClosed);
        }

        let capsule = capsule::encode(
            error_code,
            error_message,
            self.config.max_close_message_len,
        )?;
        let streams_to_reset = self.mark_session_closed(session_id);
        debug!(session_id, error_code, "session closed locally");

        Ok(CloseSessionResult {
            capsule,
            streams_to_reset,
            reset_error_code: wire::WT_SESSION_GONE,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn session_state(&self, session_id: u64) -> Option<SessionState> {
        self.sessions.get(&session_id).map(|s| s.state)
    }

    /// The session owning a data stream, once its prefix is consumed.
    pub fn stream_session(&self, stream_id: u64) -> Option<u64> {
        self.stream_to_session.get(&stream_id).copied()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn on_control_stream_data(&mut self, session_id: u64, data: &[u8], fin: bool) -> Result<()> {
        {
            let session = self
                .sessions
                .get_mut(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?;
            if session.is_closed() {
                if data.is_empty() {
                    return Ok(());
                }
                warn!(session_id, "ignoring control stream bytes after session close");
                return Err(Error::ProtocolViolation(format!(
                    "data on control stream of closed session {session_id}"
                )));
            }
            session.capsule_buf.extend_from_slice(data);
        }

        // The close capsule's message length is implicit, bounded by the
        // delivery unit: decode as soon as the type tag and error code are
        // buffered, taking the rest of the buffer as the message.
        let ready = {
            let buf = &self.sessions[&session_id].capsule_buf;
            if buf.is_empty() {
                false
            } else {
                match varint::decode(buf) {
                    Ok((capsule_type, n)) => {
                        capsule_type != wire::CAPSULE_CLOSE_SESSION || buf.len() >= n + 4
                    }
                    Err(_) => false,
                }
            }
        };

        if ready {
            let buf = std::mem::take(
                &mut self
                    .sessions
                    .get_mut(&session_id)
                    .expect("session exists")
                    .capsule_buf,
            );
            return match capsule::decode(
                &buf,
                self.config.lenient_close_utf8,
                self.config.max_close_message_len,
            ) {
                Ok((error_code, error_message)) => {
                    self.terminate_session(session_id, error_code, error_message);
                    Ok(())
                }
                Err(e) => {
                    warn!(session_id, %e, "malformed capsule on control stream");
                    self.terminate_session(session_id, 0, String::new());
                    Err(e)
                }
            };
        }

        if fin {
            // Control stream ended; partial capsule state is discarded.
            self.terminate_session(session_id, 0, String::new());
        }
        Ok(())
    }

    /// Transition a session to `Closed` (if it is not already) and close
    /// its data streams. Returns the ids of the streams that were closed.
    fn mark_session_closed(&mut self, session_id: u64) -> Vec<u64> {
        let stream_ids: Vec<u64> = match self.sessions.get_mut(&session_id) {
            Some(session) if !session.is_closed() => {
                session.state = SessionState::Closed;
                session.capsule_buf.clear();
                session.stream_ids.iter().copied().collect()
            }
            _ => return Vec::new(),
        };
        for &sid in &stream_ids {
            if let Some(st) = self.streams.get_mut(&sid) {
                // Closed with the session; no per-stream frame is emitted,
                // the session closure supersedes them.
                st.close();
            }
        }
        stream_ids
    }

    /// Remote-initiated session closure: mark closed and surface a
    /// `SessionClose` frame.
    fn terminate_session(&mut self, session_id: u64, error_code: u32, error_message: String) {
        let was_open = self
            .sessions
            .get(&session_id)
            .is_some_and(|s| !s.is_closed());
        if !was_open {
            return;
        }
        self.mark_session_closed(session_id);
        debug!(session_id, error_code, "session closed");
        self.frames.push_back(Frame::SessionClose {
            session_id,
            error_code,
            error_message,
        });
    }

    fn close_data_stream(&mut self, stream_id: u64) {
        if let Some(st) = self.streams.get_mut(&stream_id) {
            let was_relaying = st.is_relaying();
            if st.close() && was_relaying {
                self.frames.push_back(Frame::StreamClose { stream_id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{request_headers, response_headers};

    fn wt_settings() -> Vec<(u64, u64)> {
        vec![
            (wire::SETTINGS_ENABLE_WEBTRANSPORT, 1),
            (wire::SETTINGS_H3_DATAGRAM, 1),
        ]
    }

    fn server_conn() -> Connection {
        let mut c = Connection::new(true, Config::default());
        c.on_peer_settings(&wt_settings());
        c
    }

    fn client_conn() -> Connection {
        let mut c = Connection::new(false, Config::default());
        c.on_peer_settings(&wt_settings());
        c
    }

    /// Server with one open session on control stream 0.
    fn established_server() -> (Connection, u64) {
        let mut s = server_conn();
        let headers = request_headers("localhost:4433", "/webtransport");
        let outcome = s.on_request_headers(0, &headers).unwrap();
        let session_id = match outcome {
            ConnectOutcome::Accepted { session_id, .. } => session_id,
            other => panic!("expected Accepted, got {other:?}"),
        };
        s.response_sent(session_id).unwrap();
        (s, session_id)
    }

    fn established_client() -> (Connection, u64) {
        let mut c = client_conn();
        c.connect(0, "localhost:4433", "/webtransport").unwrap();
        c.on_response_headers(0, &response_headers(200)).unwrap();
        (c, 0)
    }

    // === Handshake ===

    #[test]
    fn accepted_connect_creates_pending_session() {
        let mut s = server_conn();
        let headers = request_headers("localhost:4433", "/webtransport");
        s.on_request_headers(0, &headers).unwrap();
        assert_eq!(s.session_state(0), Some(SessionState::Pending));
        s.response_sent(0).unwrap();
        assert_eq!(s.session_state(0), Some(SessionState::Open));
    }

    #[test]
    fn handshake_emits_no_frames() {
        let (mut s, _) = established_server();
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn ordinary_request_creates_no_session() {
        let mut s = server_conn();
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/index.html".to_string()),
        ];
        let outcome = s.on_request_headers(0, &headers).unwrap();
        assert_eq!(outcome, ConnectOutcome::PassThrough);
        assert_eq!(s.session_state(0), None);
    }

    #[test]
    fn connect_without_peer_capability_is_rejected() {
        let mut s = Connection::new(true, Config::default());
        // Peer advertised only datagram support.
        s.on_peer_settings(&[(wire::SETTINGS_H3_DATAGRAM, 1)]);
        let headers = request_headers("localhost:4433", "/webtransport");
        match s.on_request_headers(0, &headers).unwrap() {
            ConnectOutcome::Rejected { error, .. } => {
                assert_eq!(error, Error::CapabilityUnsupported);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(s.session_state(0), None);
    }

    #[test]
    fn second_connect_on_control_stream_is_violation() {
        let (mut s, _) = established_server();
        let headers = request_headers("localhost:4433", "/webtransport");
        assert!(matches!(
            s.on_request_headers(0, &headers),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn response_sent_twice_is_violation() {
        let (mut s, sid) = established_server();
        assert!(matches!(
            s.response_sent(sid),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn client_connect_before_settings_is_unsupported() {
        let mut c = Connection::new(false, Config::default());
        assert_eq!(
            c.connect(0, "localhost:4433", "/webtransport"),
            Err(Error::CapabilityUnsupported)
        );
    }

    #[test]
    fn client_200_opens_session() {
        let (c, sid) = established_client();
        assert_eq!(c.session_state(sid), Some(SessionState::Open));
    }

    #[test]
    fn client_rejection_closes_session_with_frame() {
        let mut c = client_conn();
        c.connect(0, "localhost:4433", "/webtransport").unwrap();
        c.on_response_headers(0, &response_headers(403)).unwrap();
        assert_eq!(c.session_state(0), Some(SessionState::Closed));
        match c.poll_frame() {
            Some(Frame::SessionClose {
                session_id,
                error_code,
                ..
            }) => {
                assert_eq!(session_id, 0);
                assert_eq!(error_code, 0);
            }
            other => panic!("expected SessionClose, got {other:?}"),
        }
    }

    // === Inbound data streams ===

    #[test]
    fn incoming_uni_stream_emits_open_then_data() {
        let (mut s, sid) = established_server();
        let mut bytes = stream::encode_prefix(sid, Direction::Unidirectional).unwrap();
        bytes.extend_from_slice(b"abc");
        s.on_stream_data(14, &bytes, false).unwrap();

        assert_eq!(
            s.poll_frame(),
            Some(Frame::StreamOpen {
                stream_id: 14,
                direction: Direction::Unidirectional
            })
        );
        assert_eq!(
            s.poll_frame(),
            Some(Frame::StreamData {
                stream_id: 14,
                payload: b"abc".to_vec()
            })
        );
        assert_eq!(s.stream_session(14), Some(sid));
    }

    #[test]
    fn split_prefix_matches_single_delivery() {
        let (mut s, sid) = established_server();
        let mut bytes = stream::encode_prefix(sid, Direction::Bidirectional).unwrap();
        bytes.extend_from_slice(b"abc");
        for &b in &bytes {
            s.on_stream_data(4, &[b], false).unwrap();
        }

        assert_eq!(
            s.poll_frame(),
            Some(Frame::StreamOpen {
                stream_id: 4,
                direction: Direction::Bidirectional
            })
        );
        // One StreamData per post-prefix byte, in order.
        let mut relayed = Vec::new();
        while let Some(frame) = s.poll_frame() {
            match frame {
                Frame::StreamData { payload, .. } => relayed.extend(payload),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(relayed, b"abc");
    }

    #[test]
    fn segments_preserve_arrival_order() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Bidirectional).unwrap();
        s.on_stream_data(4, &prefix, false).unwrap();
        s.on_stream_data(4, b"abc", false).unwrap();
        s.on_stream_data(4, b"def", false).unwrap();

        assert!(matches!(s.poll_frame(), Some(Frame::StreamOpen { .. })));
        assert_eq!(
            s.poll_frame(),
            Some(Frame::StreamData {
                stream_id: 4,
                payload: b"abc".to_vec()
            })
        );
        assert_eq!(
            s.poll_frame(),
            Some(Frame::StreamData {
                stream_id: 4,
                payload: b"def".to_vec()
            })
        );
    }

    #[test]
    fn fin_emits_stream_close_exactly_once() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Unidirectional).unwrap();
        s.on_stream_data(14, &prefix, false).unwrap();
        s.on_stream_data(14, &[], true).unwrap();
        s.on_stream_data(14, &[], true).unwrap();

        assert!(matches!(s.poll_frame(), Some(Frame::StreamOpen { .. })));
        assert_eq!(s.poll_frame(), Some(Frame::StreamClose { stream_id: 14 }));
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn data_after_close_is_violation_not_data() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Unidirectional).unwrap();
        s.on_stream_data(14, &prefix, true).unwrap();
        while s.poll_frame().is_some() {}

        assert!(matches!(
            s.on_stream_data(14, b"late", false),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn malformed_stream_type_rejected() {
        let (mut s, _) = established_server();
        // 0x3f is neither recognized stream-type tag.
        assert!(matches!(
            s.on_stream_data(14, &[0x3f, 0x00], false),
            Err(Error::Malformed(_))
        ));
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn stream_for_unknown_session_rejected() {
        let (mut s, _) = established_server();
        let bytes = stream::encode_prefix(44, Direction::Unidirectional).unwrap();
        assert_eq!(
            s.on_stream_data(14, &bytes, false),
            Err(Error::SessionNotFound(44))
        );
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn fin_during_prefix_discards_without_error() {
        let (mut s, _) = established_server();
        // Only the stream-type byte arrives before cancellation.
        s.on_stream_data(14, &[0x54], true).unwrap();
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn reset_closes_stream_once() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Bidirectional).unwrap();
        s.on_stream_data(4, &prefix, false).unwrap();
        s.on_stream_reset(4);
        s.on_stream_reset(4);

        assert!(matches!(s.poll_frame(), Some(Frame::StreamOpen { .. })));
        assert_eq!(s.poll_frame(), Some(Frame::StreamClose { stream_id: 4 }));
        assert_eq!(s.poll_frame(), None);
    }

    // === Outbound streams ===

    #[test]
    fn open_stream_prefix_is_parsable_by_peer() {
        let (mut s, sid) = established_server();
        let prefix = s.open_stream(sid, 3, Direction::Unidirectional).unwrap();

        let mut peer = DataStream::new_incoming(3, Direction::Unidirectional);
        let consumed = peer.consume_prefix(&prefix).unwrap();
        assert_eq!(consumed, prefix.len());
        assert_eq!(peer.session_id, sid);
    }

    #[test]
    fn open_stream_requires_open_session() {
        let mut s = server_conn();
        let headers = request_headers("localhost:4433", "/webtransport");
        s.on_request_headers(0, &headers).unwrap();
        // Still pending.
        assert!(matches!(
            s.open_stream(0, 3, Direction::Unidirectional),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(
            s.open_stream(99, 3, Direction::Unidirectional),
            Err(Error::SessionNotFound(99))
        );
    }

    // === Datagrams ===

    #[test]
    fn datagram_roundtrip_through_engine() {
        let (mut s, sid) = established_server();
        let bytes = s.send_datagram(sid, b"dgram").unwrap();
        s.on_datagram(&bytes).unwrap();
        assert_eq!(
            s.poll_frame(),
            Some(Frame::Datagram {
                session_id: sid,
                payload: b"dgram".to_vec()
            })
        );
    }

    #[test]
    fn datagram_for_unknown_session_errors() {
        let (mut s, _) = established_server();
        let bytes = datagram::encode(60, b"x").unwrap();
        assert_eq!(s.on_datagram(&bytes), Err(Error::SessionNotFound(60)));
    }

    #[test]
    fn datagram_for_closed_session_is_dropped() {
        let (mut s, sid) = established_server();
        s.close_session(sid, 0, "done").unwrap();
        let bytes = datagram::encode(sid, b"x").unwrap();
        s.on_datagram(&bytes).unwrap();
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn send_datagram_requires_peer_datagram_support() {
        let mut s = Connection::new(true, Config::default());
        s.on_peer_settings(&[(wire::SETTINGS_ENABLE_WEBTRANSPORT, 1)]);
        assert_eq!(s.send_datagram(0, b"x"), Err(Error::CapabilityUnsupported));
    }

    // === Session termination ===

    #[test]
    fn local_close_produces_capsule_and_reset_list() {
        let (mut s, sid) = established_server();
        s.open_stream(sid, 3, Direction::Unidirectional).unwrap();
        let result = s.close_session(sid, 42, "bye").unwrap();

        assert_eq!(result.streams_to_reset, vec![3]);
        assert_eq!(result.reset_error_code, wire::WT_SESSION_GONE);
        assert_eq!(
            capsule::decode(&result.capsule, true, 1024).unwrap(),
            (42, "bye".to_string())
        );
        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        // Local closure emits no frame; the application initiated it.
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn close_session_twice_errors() {
        let (mut s, sid) = established_server();
        s.close_session(sid, 0, "").unwrap();
        assert_eq!(s.close_session(sid, 0, ""), Err(Error::SessionClosed));
    }

    #[test]
    fn received_close_capsule_emits_session_close() {
        let (mut s, sid) = established_server();
        let bytes = capsule::encode(9999, "unknown", 1024).unwrap();
        s.on_stream_data(sid, &bytes, false).unwrap();

        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        assert_eq!(
            s.poll_frame(),
            Some(Frame::SessionClose {
                session_id: sid,
                error_code: 9999,
                error_message: "unknown".to_string()
            })
        );
    }

    #[test]
    fn close_capsule_split_across_deliveries() {
        let (mut s, sid) = established_server();
        let bytes = capsule::encode(7, "bye", 1024).unwrap();
        // Deliver the type tag alone, then the remainder.
        s.on_stream_data(sid, &bytes[..1], false).unwrap();
        assert_eq!(s.poll_frame(), None);
        s.on_stream_data(sid, &bytes[1..], false).unwrap();

        assert_eq!(
            s.poll_frame(),
            Some(Frame::SessionClose {
                session_id: sid,
                error_code: 7,
                error_message: "bye".to_string()
            })
        );
    }

    #[test]
    fn malformed_capsule_closes_session_with_error() {
        let (mut s, sid) = established_server();
        // A complete but unknown capsule type.
        let bad = varint::encode_vec(0x44).unwrap();
        assert!(matches!(
            s.on_stream_data(sid, &bad, false),
            Err(Error::Malformed(_))
        ));
        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        assert!(matches!(s.poll_frame(), Some(Frame::SessionClose { .. })));
    }

    #[test]
    fn control_stream_fin_closes_session() {
        let (mut s, sid) = established_server();
        s.on_stream_data(sid, &[], true).unwrap();
        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        assert_eq!(
            s.poll_frame(),
            Some(Frame::SessionClose {
                session_id: sid,
                error_code: 0,
                error_message: String::new()
            })
        );
    }

    #[test]
    fn control_stream_reset_closes_session() {
        let (mut s, sid) = established_server();
        s.on_stream_reset(sid);
        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        assert!(matches!(s.poll_frame(), Some(Frame::SessionClose { .. })));
    }

    #[test]
    fn closed_session_accepts_nothing_further() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Unidirectional).unwrap();
        s.on_stream_data(14, &prefix, false).unwrap();
        while s.poll_frame().is_some() {}
        s.close_session(sid, 1, "gone").unwrap();

        // New stream naming the closed session.
        let prefix2 = stream::encode_prefix(sid, Direction::Bidirectional).unwrap();
        assert!(matches!(
            s.on_stream_data(4, &prefix2, false),
            Err(Error::ProtocolViolation(_))
        ));
        // Outbound operations refuse too.
        assert_eq!(s.send_datagram(sid, b"x"), Err(Error::SessionClosed));
        assert_eq!(
            s.open_stream(sid, 7, Direction::Unidirectional),
            Err(Error::SessionClosed)
        );
        assert_eq!(s.poll_frame(), None);
    }

    #[test]
    fn connection_close_tears_down_all_sessions() {
        let (mut s, sid) = established_server();
        let prefix = stream::encode_prefix(sid, Direction::Bidirectional).unwrap();
        s.on_stream_data(4, &prefix, false).unwrap();
        while s.poll_frame().is_some() {}

        s.on_connection_closed();
        assert_eq!(s.session_state(sid), Some(SessionState::Closed));
        assert!(matches!(s.poll_frame(), Some(Frame::SessionClose { .. })));
        assert_eq!(s.poll_frame(), None);
    }
}
