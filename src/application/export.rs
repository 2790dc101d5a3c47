//! Bounded HTML → PDF rasterization onto local ephemeral storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::page_format::PageFormat;

use super::background::BackgroundTasks;
use super::stage::{EngineError, StageError, race};

const SOURCE: &str = "application::export";

/// Rasterizer contract: `rasterize(html, format, path) -> error`.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    async fn rasterize(
        &self,
        html: &str,
        format: PageFormat,
        output: &Path,
    ) -> Result<(), EngineError>;
}

/// A PDF sitting in the work directory, named after the id it will be
/// published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub id: Uuid,
    pub path: PathBuf,
}

impl LocalArtifact {
    pub fn remote_path(&self) -> String {
        format!("templates/{}.pdf", self.id)
    }
}

#[derive(Clone)]
pub struct ExportStage {
    rasterizer: Arc<dyn Rasterizer>,
    timeout: Duration,
    work_dir: PathBuf,
    tasks: BackgroundTasks,
}

impl ExportStage {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        timeout: Duration,
        work_dir: PathBuf,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            rasterizer,
            timeout,
            work_dir,
            tasks,
        }
    }

    pub async fn export(&self, html: String, format: PageFormat) -> Result<LocalArtifact, StageError> {
        let started_at = Instant::now();
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|err| {
                EngineError::new(format!(
                    "failed to create work directory {}: {err}",
                    self.work_dir.display()
                ))
            })?;

        let id = Uuid::new_v4();
        let path = self.work_dir.join(format!("template_{id}.pdf"));

        let rasterizer = self.rasterizer.clone();
        let output = path.clone();
        let worker =
            tokio::spawn(async move { rasterizer.rasterize(&html, format, &output).await });
        let mut pending = PendingOutput::new(path, worker, self.tasks.clone());

        // Any exit other than `claim` below, including the caller being
        // cancelled at this await, leaves the output to the guard.
        pending.wait(self.timeout).await?;
        let path = pending.claim();
        debug!(
            target = SOURCE,
            op = "export",
            result = "ok",
            path = %path.display(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "document rasterized"
        );
        Ok(LocalArtifact { id, path })
    }
}

/// Rasterizer worker plus the file it writes, until the export is claimed.
///
/// Dropped unclaimed, it removes the output in the background, first waiting
/// for a worker that lost the race. A late write from a timed-out rasterizer
/// is therefore cleaned up too.
struct PendingOutput {
    path: PathBuf,
    /// Present while the worker may still be running.
    worker: Option<JoinHandle<Result<(), EngineError>>>,
    claimed: bool,
    tasks: BackgroundTasks,
}

impl PendingOutput {
    fn new(
        path: PathBuf,
        worker: JoinHandle<Result<(), EngineError>>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            path,
            worker: Some(worker),
            claimed: false,
            tasks,
        }
    }

    async fn wait(&mut self, limit: Duration) -> Result<(), StageError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        let outcome = race("export", limit, worker).await;
        if !matches!(outcome, Err(StageError::Timeout(_))) {
            // Finished; the handle must not be polled again.
            self.worker = None;
        }
        outcome
    }

    fn claim(mut self) -> PathBuf {
        self.claimed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if self.claimed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let worker = self.worker.take();
        if Handle::try_current().is_err() {
            let _ = std::fs::remove_file(&path);
            return;
        }
        self.tasks.spawn("export_cleanup", async move {
            if let Some(worker) = worker {
                let _ = worker.await;
            }
            discard_partial(&path).await;
        });
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(
            target = SOURCE,
            op = "discard_partial",
            path = %path.display(),
            "removed partial export"
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            target = SOURCE,
            op = "discard_partial",
            path = %path.display(),
            error = %err,
            "failed to remove partial export"
        ),
    }
}
