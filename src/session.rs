use std::collections::HashSet;

/// Lifecycle of one WebTransport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// CONNECT accepted, success response not yet confirmed on the wire.
    Pending,
    /// Handshake complete; streams and datagrams flow.
    Open,
    /// Terminal. Nothing is accepted or emitted for the session anymore.
    Closed,
}

/// One WebTransport session, bound to the control stream that carried its
/// CONNECT. The session id is that stream's id.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub state: SessionState,
    pub authority: String,
    pub path: String,
    /// Data streams owned by this session, tracked by id only; the
    /// transport keeps its own stream bookkeeping.
    pub stream_ids: HashSet<u64>,
    /// Partial close-capsule prefix awaiting more control-stream bytes.
    pub(crate) capsule_buf: Vec<u8>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: SessionState::Pending,
            authority: String::new(),
            path: String::new(),
            stream_ids: HashSet::new(),
            capsule_buf: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn register_stream(&mut self, stream_id: u64) {
        self.stream_ids.insert(stream_id);
    }

    pub fn remove_stream(&mut self, stream_id: u64) {
        self.stream_ids.remove(&stream_id);
    }
}
