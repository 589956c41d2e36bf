use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::entry::AuditEntry;

/// Why an entry could not be made durable.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cannot append to audit log {path}: {source}")]
    Append {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Append-only JSON-lines writer for [`AuditEntry`] values.
///
/// Each entry is encoded into one buffer, handed to the file in a single
/// `write_all` and flushed before [`AuditWriter::append`] returns, so a
/// line is on disk as soon as it has been appended and is never split by
/// another writer of the same process.
#[derive(Debug)]
pub struct AuditWriter {
    path: PathBuf,
    file: tokio::fs::File,
}

impl AuditWriter {
    /// Open (or create) the audit log at `path` in append mode, creating
    /// parent directories as needed.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source: std::io::Error| AuditWriteError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_error)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_error)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` as one line and flush it through to the file.
    pub async fn append(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let written = match self.file.write_all(&line).await {
            Ok(()) => self.file.flush().await,
            Err(err) => Err(err),
        };
        written.map_err(|source| AuditWriteError::Append {
            path: self.path.clone(),
            source,
        })
    }
}
