use crate::wire;

/// Tunable policy for one connection's WebTransport engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Paths a server accepts extended-CONNECT requests on. Empty means
    /// any path is acceptable. A CONNECT for a non-matching path is handed
    /// back to ordinary HTTP handling, not errored.
    pub endpoint_paths: Vec<String>,

    /// Advertise HTTP/3 datagram support in SETTINGS.
    pub enable_datagrams: bool,

    /// Replace invalid UTF-8 in a received close-capsule message with
    /// U+FFFD instead of rejecting the capsule. On by default.
    pub lenient_close_utf8: bool,

    /// Upper bound on the close-capsule message accepted or produced.
    pub max_close_message_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_paths: vec!["/webtransport".to_string()],
            enable_datagrams: true,
            lenient_close_utf8: true,
            max_close_message_len: 1024,
        }
    }
}

impl Config {
    /// The SETTINGS key-value pairs this endpoint must advertise for the
    /// WebTransport handshake to be attempted by a peer.
    pub fn h3_settings(&self) -> Vec<(u64, u64)> {
        let mut s = vec![(wire::SETTINGS_ENABLE_WEBTRANSPORT, 1)];
        if self.enable_datagrams {
            s.push((wire::SETTINGS_H3_DATAGRAM, 1));
        }
        s
    }

    pub(crate) fn path_acceptable(&self, path: &str) -> bool {
        self.endpoint_paths.is_empty() || self.endpoint_paths.iter().any(|p| p == path)
    }
}

/// Capability flags observed in the peer's SETTINGS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerSettings {
    pub h3_datagram: bool,
    pub enable_webtransport: bool,
}

impl PeerSettings {
    /// Parse the flags this layer cares about out of a raw SETTINGS list.
    /// Unknown identifiers are ignored.
    pub fn from_raw(settings: &[(u64, u64)]) -> Self {
        let mut out = Self::default();
        for &(id, value) in settings {
            match id {
                wire::SETTINGS_H3_DATAGRAM => out.h3_datagram = value == 1,
                wire::SETTINGS_ENABLE_WEBTRANSPORT => out.enable_webtransport = value == 1,
                _ => {}
            }
        }
        out
    }

    /// Both capability flags must be present for a handshake to proceed.
    pub fn supports_webtransport(&self) -> bool {
        self.h3_datagram && self.enable_webtransport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_advertise_both_flags() {
        let settings = Config::default().h3_settings();
        let has = |id: u64| settings.iter().any(|&(k, v)| k == id && v == 1);
        assert!(has(wire::SETTINGS_ENABLE_WEBTRANSPORT));
        assert!(has(wire::SETTINGS_H3_DATAGRAM));
    }

    #[test]
    fn datagrams_disabled_omits_setting() {
        let cfg = Config {
            enable_datagrams: false,
            ..Config::default()
        };
        assert!(!cfg
            .h3_settings()
            .iter()
            .any(|&(k, _)| k == wire::SETTINGS_H3_DATAGRAM));
    }

    #[test]
    fn peer_settings_require_both_flags() {
        let both = PeerSettings::from_raw(&[
            (wire::SETTINGS_H3_DATAGRAM, 1),
            (wire::SETTINGS_ENABLE_WEBTRANSPORT, 1),
        ]);
        assert!(both.supports_webtransport());

        let datagram_only = PeerSettings::from_raw(&[(wire::SETTINGS_H3_DATAGRAM, 1)]);
        assert!(!datagram_only.supports_webtransport());

        let zero_valued = PeerSettings::from_raw(&[
            (wire::SETTINGS_H3_DATAGRAM, 1),
            (wire::SETTINGS_ENABLE_WEBTRANSPORT, 0),
        ]);
        assert!(!zero_valued.supports_webtransport());
    }

    #[test]
    fn unknown_settings_ignored() {
        let peer = PeerSettings::from_raw(&[(0x4d44, 420), (wire::SETTINGS_H3_DATAGRAM, 1)]);
        assert!(peer.h3_datagram);
        assert!(!peer.enable_webtransport);
    }

    #[test]
    fn path_policy() {
        let cfg = Config::default();
        assert!(cfg.path_acceptable("/webtransport"));
        assert!(!cfg.path_acceptable("/"));

        let any = Config {
            endpoint_paths: Vec::new(),
            ..Config::default()
        };
        assert!(any.path_acceptable("/anything"));
    }
}
