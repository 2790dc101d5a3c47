//! Upload and usage accounting after a successful export.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{ContentFingerprint, FingerprintCache};

use super::background::BackgroundTasks;
use super::export::LocalArtifact;
use super::quota::{KeyHandle, QuotaGate};

const SOURCE: &str = "application::publish";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read local artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("object storage rejected upload: {0}")]
    Rejected(String),
    #[error("object storage unreachable: {0}")]
    Transport(String),
    #[error("invalid object path `{0}`")]
    InvalidPath(String),
    #[error("publish task did not complete: {0}")]
    Interrupted(String),
}

/// Object storage contract: `upload(local, remote) -> url`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, local: &Path, remote: &str) -> Result<String, StorageError>;
}

#[derive(Clone)]
pub struct PublishStage {
    storage: Arc<dyn ObjectStorage>,
    quota: QuotaGate,
    cache: Arc<FingerprintCache>,
    tasks: BackgroundTasks,
    cleanup_delay: Duration,
}

impl PublishStage {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        quota: QuotaGate,
        cache: Arc<FingerprintCache>,
        tasks: BackgroundTasks,
        cleanup_delay: Duration,
    ) -> Self {
        Self {
            storage,
            quota,
            cache,
            tasks,
            cleanup_delay,
        }
    }

    /// Upload the artifact while counting the usage, then cache the URL.
    ///
    /// The work runs as a tracked task, so a caller that stops waiting does
    /// not strand the local file or leave the upload half accounted.
    pub async fn publish(
        &self,
        artifact: LocalArtifact,
        key: KeyHandle,
        fingerprint: ContentFingerprint,
    ) -> Result<String, StorageError> {
        let stage = self.clone();
        self.tasks
            .spawn_joinable("publish", async move {
                stage.upload_and_account(artifact, key, fingerprint).await
            })
            .await
            .map_err(|err| StorageError::Interrupted(err.to_string()))?
    }

    async fn upload_and_account(
        &self,
        artifact: LocalArtifact,
        key: KeyHandle,
        fingerprint: ContentFingerprint,
    ) -> Result<String, StorageError> {
        let remote = artifact.remote_path();
        let (uploaded, accounted) = tokio::join!(
            self.storage.upload(&artifact.path, &remote),
            self.quota.record_usage(&key),
        );

        if let Err(err) = accounted {
            warn!(
                target = SOURCE,
                op = "record_usage",
                result = "error",
                key_id = key.key_id,
                error = %err,
                "failed to record key usage"
            );
        }

        match uploaded {
            Ok(url) => {
                self.cache.store(fingerprint, url.clone());
                self.schedule_cleanup(artifact);
                Ok(url)
            }
            Err(err) => {
                if let Err(io) = tokio::fs::remove_file(&artifact.path).await {
                    warn!(
                        target = SOURCE,
                        op = "upload",
                        path = %artifact.path.display(),
                        error = %io,
                        "failed to remove local artifact after upload error"
                    );
                }
                Err(err)
            }
        }
    }

    fn schedule_cleanup(&self, artifact: LocalArtifact) {
        let delay = self.cleanup_delay;
        self.tasks.spawn("artifact_cleanup", async move {
            tokio::time::sleep(delay).await;
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => debug!(
                    target = SOURCE,
                    op = "cleanup",
                    path = %artifact.path.display(),
                    "removed published artifact"
                ),
                Err(err) => warn!(
                    target = SOURCE,
                    op = "cleanup",
                    path = %artifact.path.display(),
                    error = %err,
                    "failed to remove published artifact"
                ),
            }
        });
    }
}
