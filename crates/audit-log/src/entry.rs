use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable audit record. Serialises as
/// `{"ts": .., "dir": .., "type": .., "data": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub dir: Direction,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub data: String,
}

impl AuditEntry {
    /// Create an entry stamped with the current UTC time.
    pub fn new(dir: Direction, kind: EntryKind, data: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            dir,
            kind,
            data: data.into(),
        }
    }

    /// A decoded text frame, carrying the full text.
    pub fn ws_text(dir: Direction, text: impl Into<String>) -> Self {
        Self::new(dir, EntryKind::WsText, text)
    }

    /// A decoded binary frame. Only the size is recorded, never the bytes.
    pub fn ws_binary(dir: Direction, len: usize) -> Self {
        Self::new(dir, EntryKind::WsBinary, format!("<{len} bytes>"))
    }

    /// Teardown of a connection pair, tagged with the side that ended it.
    pub fn close(dir: Direction, reason: impl Into<String>) -> Self {
        Self::new(dir, EntryKind::Close, reason)
    }
}

/// Which way a message travelled through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes read from the upstream browser endpoint.
    #[serde(rename = "gw→ext")]
    GatewayToExtension,
    /// Bytes read from the downstream client.
    #[serde(rename = "ext→gw")]
    ExtensionToGateway,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GatewayToExtension => write!(f, "gw→ext"),
            Self::ExtensionToGateway => write!(f, "ext→gw"),
        }
    }
}

/// The category of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "ws")]
    WsText,
    #[serde(rename = "ws-binary")]
    WsBinary,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "upgrade")]
    Upgrade,
    #[serde(rename = "close")]
    Close,
}
