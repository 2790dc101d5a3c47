//! Headless Chromium rasterizer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::application::export::Rasterizer;
use crate::application::stage::EngineError;
use crate::domain::page_format::PageFormat;

const SOURCE: &str = "infra::chromium";

/// Prints HTML to PDF by running `chromium --headless --print-to-pdf`.
///
/// The page size comes from the `@page` rule in the document shell, so the
/// format is only used for logging here.
#[derive(Debug, Clone)]
pub struct ChromiumRasterizer {
    executable: PathBuf,
}

impl ChromiumRasterizer {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl Rasterizer for ChromiumRasterizer {
    async fn rasterize(
        &self,
        html: &str,
        format: PageFormat,
        output: &Path,
    ) -> Result<(), EngineError> {
        let started_at = Instant::now();
        let html_path = output.with_extension("html");
        tokio::fs::write(&html_path, html).await.map_err(|err| {
            EngineError::new(format!(
                "failed to write {}: {err}",
                html_path.display()
            ))
        })?;

        let result = Command::new(&self.executable)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(&html_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        if let Err(err) = tokio::fs::remove_file(&html_path).await {
            warn!(
                target = SOURCE,
                op = "rasterize",
                path = %html_path.display(),
                error = %err,
                "failed to remove intermediate HTML"
            );
        }

        let output_status = result.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                EngineError::new(format!(
                    "chromium executable `{}` not found",
                    self.executable.display()
                ))
            } else {
                EngineError::new(format!("failed to spawn chromium: {err}"))
            }
        })?;

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr).into_owned();
            warn!(
                target = SOURCE,
                op = "rasterize",
                result = "error",
                exit_code = output_status.status.code().map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "chromium exited with failure"
            );
            return Err(EngineError::new(format!(
                "chromium exited with {}: {}",
                output_status.status,
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(EngineError::new("chromium reported success but wrote no PDF"));
        }

        info!(
            target = SOURCE,
            op = "rasterize",
            result = "ok",
            format = format.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output = %output.display(),
            "document printed to PDF"
        );
        Ok(())
    }
}
