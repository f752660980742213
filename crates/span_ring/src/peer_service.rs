//! Peer service inference.
//!
//! Instrumentation rarely sets `peer.service` explicitly. While a span's tags
//! are enumerated, [`PeerServiceState`] remembers the best-ranked peer-ish key
//! it has seen plus any `net.peer.*` address parts, and
//! [`PeerServiceState::resolve`] turns that into a single label.

use crate::tag::TagValue;

/// Explicit peer service key.
pub const PEER_SERVICE: &str = "peer.service";
pub const NET_PEER_NAME: &str = "net.peer.name";
pub const NET_PEER_IP: &str = "net.peer.ip";
pub const NET_PEER_PORT: &str = "net.peer.port";

/// Keys that can name the peer, ranked by priority (lower wins).
const PRIORITY_TABLE: &[(&str, u8)] = &[
    (PEER_SERVICE, 0),
    ("peer.hostname", 1),
    ("peer.address", 1),
    // peer.service for HTTP
    ("http.host", 2),
    // peer.service for Redis
    ("db.instance", 2),
];

fn priority_of(key: &str) -> Option<u8> {
    PRIORITY_TABLE
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|&(_, priority)| priority)
}

/// The resolved peer service label for a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerService {
    pub name: String,
    /// True when the label is not already present verbatim as a
    /// `peer.service` tag and has to be emitted.
    pub add_as_tag: bool,
}

/// Accumulates peer hints while a span's tags are scanned.
#[derive(Debug, Clone, Default)]
pub struct PeerServiceState {
    best: Option<(u8, String)>,
    host_name: Option<String>,
    ip_address: Option<String>,
    port: i64,
}

impl PeerServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspects a tag of any kind. Ranked keys holding a non-string value
    /// count by their rendered form, so an explicit `peer.service` always
    /// suppresses synthesis.
    pub fn inspect(&mut self, key: &str, value: &TagValue) {
        match value {
            TagValue::String(s) => self.inspect_str(key, s),
            TagValue::Long(v) => {
                self.inspect_long(key, *v);
                self.rank(key, || v.to_string());
            }
            TagValue::Double(v) => {
                self.rank(key, || v.to_string());
            }
            TagValue::Bool(v) => {
                self.rank(key, || v.to_string());
            }
            TagValue::Binary(_) => {}
        }
    }

    /// Inspects a string-valued tag.
    pub fn inspect_str(&mut self, key: &str, value: &str) {
        if self.rank(key, || value.to_string()) {
            return;
        }
        if key == NET_PEER_NAME {
            self.host_name = Some(value.to_string());
        } else if key == NET_PEER_IP {
            self.ip_address = Some(value.to_string());
        } else if key == NET_PEER_PORT {
            if let Ok(port) = value.parse() {
                self.port = port;
            }
        }
    }

    /// Records `key` if it is a ranked key. Returns whether it was one.
    fn rank(&mut self, key: &str, value: impl FnOnce() -> String) -> bool {
        let Some(priority) = priority_of(key) else {
            return false;
        };
        if self.best.as_ref().map_or(true, |(best, _)| priority < *best) {
            self.best = Some((priority, value()));
        }
        true
    }

    /// Inspects an integer-valued tag.
    pub fn inspect_long(&mut self, key: &str, value: i64) {
        if key == NET_PEER_PORT {
            self.port = value;
        }
    }

    /// Resolves the peer service label, if any hint was seen.
    pub fn resolve(self) -> Option<PeerService> {
        if let Some((0, name)) = self.best {
            return Some(PeerService {
                name,
                add_as_tag: false,
            });
        }

        if let Some(host) = self.host_name.or(self.ip_address) {
            let name = if self.port == 0 {
                host
            } else {
                format!("{}:{}", host, self.port)
            };
            return Some(PeerService {
                name,
                add_as_tag: true,
            });
        }

        self.best.map(|(_, name)| PeerService {
            name,
            add_as_tag: true,
        })
    }
}
