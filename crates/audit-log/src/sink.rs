use std::path::Path;

use script_alert::ScriptAlerter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::entry::{AuditEntry, EntryKind};
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
pub const CHANNEL_BUFFER: usize = 8192;

/// A cheap, cloneable handle through which every connection records
/// [`AuditEntry`] values.
///
/// Recording never waits: entries go into a bounded channel drained by a
/// background writer, and an entry that does not fit is dropped with a
/// warning. Relaying traffic always takes priority over completeness of
/// the trail.
#[derive(Clone, Debug)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
    alerter: ScriptAlerter,
}

impl AuditSink {
    /// Spawn the background writer for the log file at `path` and return a
    /// `(sink, join_handle)` pair.
    ///
    /// Every entry is on disk once the task has appended it; there is no
    /// batching. An entry that cannot be written is logged via
    /// `tracing::error` and skipped, and the task keeps draining. It exits
    /// once the last sink clone is dropped and the queue is empty.
    pub async fn start(
        path: impl AsRef<Path>,
        alerter: ScriptAlerter,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let writer = AuditWriter::new(path).await?;
        let (sink, rx) = Self::channel(alerter, CHANNEL_BUFFER);

        let handle = tokio::spawn(persist_entries(writer, rx));

        Ok((sink, handle))
    }

    /// Build a sink whose entries are delivered to the returned receiver
    /// instead of a file.
    pub fn channel(alerter: ScriptAlerter, capacity: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, alerter }, rx)
    }

    /// Record one entry.
    ///
    /// Text frames are run through the script alerter first. The entry is
    /// then queued for writing; if the queue is full or the writer is gone
    /// the entry is dropped and a warning is logged.
    pub fn record(&self, entry: AuditEntry) {
        if entry.kind == EntryKind::WsText {
            self.alerter.check(&entry.data);
        }

        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                tracing::warn!(
                    kind = ?entry.kind,
                    dir = %entry.dir,
                    "audit queue full, entry dropped"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                tracing::warn!(
                    kind = ?entry.kind,
                    dir = %entry.dir,
                    "audit writer gone, entry dropped"
                );
            }
        }
    }
}

/// Append queued entries one at a time until every sender is gone.
async fn persist_entries(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut lost: u64 = 0;

    while let Some(entry) = rx.recv().await {
        if let Err(err) = writer.append(&entry).await {
            lost += 1;
            tracing::error!(
                %err,
                kind = ?entry.kind,
                dir = %entry.dir,
                lost,
                "audit entry not persisted"
            );
        }
    }

    tracing::debug!(path = %writer.path().display(), lost, "audit writer stopped");
}
