//! Fire-and-forget persistence of generation logs.

use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::generation_logs::NewGenerationLog;

use super::background::BackgroundTasks;
use super::repos::GenerationLogsRepo;

const SOURCE: &str = "application::audit";

#[derive(Clone)]
pub struct AuditSink {
    logs: Arc<dyn GenerationLogsRepo>,
    tasks: BackgroundTasks,
}

impl AuditSink {
    pub fn new(logs: Arc<dyn GenerationLogsRepo>, tasks: BackgroundTasks) -> Self {
        Self { logs, tasks }
    }

    /// Append `entry` from a detached task. Write failures are logged only.
    pub fn record(&self, entry: NewGenerationLog) {
        let logs = self.logs.clone();
        self.tasks.spawn("audit", async move {
            let key_id = entry.key_id;
            let template_id = entry.template_id;
            let status = entry.status_code;
            match logs.append(entry).await {
                Ok(()) => debug!(
                    target = SOURCE,
                    op = "append",
                    result = "ok",
                    key_id,
                    template_id,
                    status,
                    "generation log written"
                ),
                Err(err) => error!(
                    target = SOURCE,
                    op = "append",
                    result = "error",
                    key_id,
                    template_id,
                    status,
                    error = %err,
                    "failed to write generation log"
                ),
            }
        });
    }
}
