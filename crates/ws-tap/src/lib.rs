//! Transparent, auditing relay for browser remote-debugging connections.
//!
//! The relay sits between a gateway client and a browser endpoint reached
//! over a Unix socket. Every byte is forwarded unchanged; a copy of each
//! direction's stream runs through its own tap so that WebSocket frames can
//! be decoded and written to the audit trail.
//!
//! # Architecture
//!
//! ```text
//! client --TCP-->  ws-tap  --Unix socket-->  browser endpoint
//!                    |
//!      [UpgradeSplitter -> FrameDecoder] x 2
//!                    |
//!               [Audit Sink] -> script alerts
//! ```
//!
//! A connection may carry several plain HTTP requests (keep-alive) before
//! one of them upgrades. Each direction's [`UpgradeSplitter`] walks the
//! HTTP heads and bodies on its side, so every request is audited and
//! frame decoding starts exactly at the upgrade boundary. Fragmented
//! messages are not reassembled; each frame is audited on its own.

pub mod bridge;
pub mod frame;
pub mod http_head;
pub mod listener;
pub mod relay;
pub mod splitter;
pub mod tap;

pub use bridge::{Bridge, BridgeConfig};
pub use frame::{Frame, FrameDecoder, FrameError, OpCode, DEFAULT_MAX_FRAME_LEN};
pub use listener::{Proxy, ProxyConfig};
pub use relay::{relay, PairClosed, PumpEnd, Taps};
pub use splitter::{Split, SplitError, UpgradeSplitter};
pub use tap::{DirectionTap, TapError};
