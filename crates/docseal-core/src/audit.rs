//! Audit trail of signing attempts.
//!
//! Every approve or reject attempt produces one [`AuditEntry`], whether
//! verification passed or not. Successful transitions are fail-closed: if
//! no backend accepts the entry, the transition is not applied. Failed
//! verifications are recorded best-effort, since they change nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::AuditError;

/// What a signing attempt came to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Signed,
    Rejected,
    VerificationFailed,
}

/// One signing attempt against one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningAttempt {
    pub document_id: String,
    /// Slot id: a signature field name or a group prefix.
    pub field_name: String,
    pub signer_id: String,
    pub pin_verified: bool,
    /// Only meaningful when the signer has 2FA enabled.
    pub totp_verified: bool,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub reason: Option<String>,
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    #[serde(flatten)]
    pub attempt: SigningAttempt,
}

impl AuditEntry {
    #[must_use]
    pub fn new(attempt: SigningAttempt) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt,
        }
    }
}

/// A destination for audit entries.
#[async_trait::async_trait]
pub trait AuditBackend: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Persist one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry was not persisted.
    async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Fans entries out to every registered backend.
#[derive(Default)]
pub struct AuditManager {
    backends: RwLock<Vec<Arc<dyn AuditBackend>>>,
}

impl AuditManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_backend(&self, backend: Arc<dyn AuditBackend>) {
        self.backends.write().await.push(backend);
    }

    pub async fn has_backends(&self) -> bool {
        !self.backends.read().await.is_empty()
    }

    /// Log an entry that gates a state change. With no backends registered
    /// there is nothing to satisfy and this succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::AllBackendsFailed`] if every backend fails.
    pub async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let backends = self.backends.read().await;
        if backends.is_empty() {
            return Ok(());
        }

        let mut accepted = 0;
        for backend in backends.iter() {
            match backend.log(entry).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(backend = backend.name(), error = %e, "audit backend failed"),
            }
        }
        if accepted == 0 {
            Err(AuditError::AllBackendsFailed)
        } else {
            Ok(())
        }
    }

    /// Log an entry whose loss does not block anything.
    pub async fn record_best_effort(&self, entry: &AuditEntry) {
        if let Err(e) = self.record(entry).await {
            warn!(
                document = %entry.attempt.document_id,
                signer = %entry.attempt.signer_id,
                error = %e,
                "signing attempt not audited"
            );
        }
    }
}

impl std::fmt::Debug for AuditManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditManager").finish_non_exhaustive()
    }
}

/// Keeps entries in memory. Useful for tests and for inspecting recent
/// attempts.
#[derive(Debug, Default)]
pub struct MemoryAuditBackend {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditBackend for MemoryAuditBackend {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "memory"
    }

    async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait::async_trait]
    impl AuditBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn log(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::BackendFailure {
                name: "broken".to_owned(),
                reason: "disk full".to_owned(),
            })
        }
    }

    fn entry(outcome: AttemptOutcome) -> AuditEntry {
        AuditEntry::new(SigningAttempt {
            document_id: "d1".to_owned(),
            field_name: "manager".to_owned(),
            signer_id: "u1".to_owned(),
            pin_verified: true,
            totp_verified: false,
            timestamp: Utc::now(),
            outcome,
            reason: None,
        })
    }

    #[tokio::test]
    async fn one_working_backend_is_enough() {
        let manager = AuditManager::new();
        let memory = Arc::new(MemoryAuditBackend::new());
        manager.add_backend(Arc::new(Broken)).await;
        manager.add_backend(memory.clone()).await;
        manager.record(&entry(AttemptOutcome::Signed)).await.unwrap();
        assert_eq!(memory.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn all_backends_failing_is_an_error() {
        let manager = AuditManager::new();
        manager.add_backend(Arc::new(Broken)).await;
        assert!(matches!(
            manager.record(&entry(AttemptOutcome::Signed)).await,
            Err(AuditError::AllBackendsFailed)
        ));
        manager.record_best_effort(&entry(AttemptOutcome::VerificationFailed)).await;
    }

    #[tokio::test]
    async fn no_backends_means_nothing_to_fail() {
        let manager = AuditManager::new();
        assert!(!manager.has_backends().await);
        manager.record(&entry(AttemptOutcome::Rejected)).await.unwrap();
    }

    #[test]
    fn entries_serialize_flat() {
        let json = serde_json::to_value(entry(AttemptOutcome::VerificationFailed)).unwrap();
        assert_eq!(json["outcome"], "verification_failed");
        assert_eq!(json["documentId"], "d1");
        assert!(json["id"].is_string());
    }
}
