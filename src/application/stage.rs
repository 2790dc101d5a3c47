//! Shared plumbing for the bounded render and export stages.

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

/// Failure reported by an external engine (templating or rasterization).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error(transparent)]
    Failed(#[from] EngineError),
}

impl StageError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Await `worker` or give up after `limit`. The handle stays with the caller,
/// so a worker that loses the race keeps running until the caller drops or
/// reclaims it.
pub(crate) async fn race<T>(
    stage: &'static str,
    limit: Duration,
    worker: &mut JoinHandle<Result<T, EngineError>>,
) -> Result<T, StageError> {
    match tokio::time::timeout(limit, worker).await {
        Err(_) => Err(StageError::Timeout(limit)),
        Ok(Err(join)) => Err(StageError::Failed(EngineError::new(format!(
            "{stage} worker aborted: {join}"
        )))),
        Ok(Ok(result)) => result.map_err(StageError::Failed),
    }
}
