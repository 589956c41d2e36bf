//! Append-only JSON-lines audit trail for the devtools relay.
//!
//! Every decoded WebSocket message and every proxy lifecycle event becomes
//! one [`AuditEntry`], serialised as a single newline-terminated JSON object
//! `{"ts", "dir", "type", "data"}` and appended to a log file by a
//! background task. Text messages are also screened by a
//! [`script_alert::ScriptAlerter`] before they are queued.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditSink, Direction};
//! use script_alert::ScriptAlerter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("relay-audit.jsonl", ScriptAlerter::default()).await?;
//!
//! sink.record(AuditEntry::ws_text(
//!     Direction::ExtensionToGateway,
//!     r#"{"id":1,"method":"Page.enable"}"#,
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, Direction, EntryKind};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
