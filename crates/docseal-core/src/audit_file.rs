//! Append-only JSON-lines audit log.
//!
//! One line per [`AuditEntry`]. The file is opened when the backend is
//! created, so a bad path fails at startup rather than on the first
//! signature. Writes are serialized by a `tokio::sync::Mutex`.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::{AuditBackend, AuditEntry};
use crate::error::AuditError;

const BACKEND_NAME: &str = "file";

/// Audit backend appending to a file.
pub struct FileAuditBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditBackend {
    /// Open (creating if needed) the log at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::BackendFailure`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| failure(format!("cannot open '{}': {e}", path.display())))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn failure(reason: String) -> AuditError {
    AuditError::BackendFailure {
        name: BACKEND_NAME.to_owned(),
        reason,
    }
}

#[async_trait::async_trait]
impl AuditBackend for FileAuditBackend {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| failure(format!("write failed: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| failure(format!("sync failed: {e}")))
    }
}

impl std::fmt::Debug for FileAuditBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::audit::{AttemptOutcome, SigningAttempt};

    fn entry(signer: &str) -> AuditEntry {
        AuditEntry::new(SigningAttempt {
            document_id: "d1".to_owned(),
            field_name: "hr".to_owned(),
            signer_id: signer.to_owned(),
            pin_verified: false,
            totp_verified: false,
            timestamp: Utc::now(),
            outcome: AttemptOutcome::VerificationFailed,
            reason: Some("incorrect PIN".to_owned()),
        })
    }

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let backend = FileAuditBackend::open(&path).await.unwrap();
        backend.log(&entry("u1")).await.unwrap();
        backend.log(&entry("u2")).await.unwrap();
        drop(backend);

        let reopened = FileAuditBackend::open(&path).await.unwrap();
        reopened.log(&entry("u3")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let signers: Vec<String> = contents
            .lines()
            .map(|l| serde_json::from_str::<AuditEntry>(l).unwrap().attempt.signer_id)
            .collect();
        assert_eq!(signers, vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn unopenable_path_fails_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileAuditBackend::open(dir.path().join("missing/audit.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::BackendFailure { .. }));
    }
}
