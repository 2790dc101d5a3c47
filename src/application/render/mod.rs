//! Bounded template rendering.
//!
//! The templating engine is synchronous and runs on the blocking pool. The
//! stage waits for it up to the configured timeout and then wraps the output in
//! the printable document shell.

mod document;
mod handlebars;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::page_format::PageFormat;
use crate::domain::templates::TemplateRecord;

use super::stage::{EngineError, StageError, race};

pub use self::document::{DocumentShell, font_import_href};
pub use self::handlebars::HandlebarsEngine;

const SOURCE: &str = "application::render";

/// Templating engine contract: `render(content, data) -> text | error`.
pub trait TemplateEngine: Send + Sync + 'static {
    fn render(&self, content: &str, data: &Value) -> Result<String, EngineError>;
}

#[derive(Clone)]
pub struct RenderStage {
    engine: Arc<dyn TemplateEngine>,
    timeout: Duration,
}

impl RenderStage {
    pub fn new(engine: Arc<dyn TemplateEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Render `template` against `data` and return the full HTML document.
    pub async fn render(
        &self,
        template: &TemplateRecord,
        data: &Map<String, Value>,
        format: PageFormat,
    ) -> Result<String, StageError> {
        let started_at = Instant::now();
        let engine = self.engine.clone();
        let content = template.content.clone();
        let data = Value::Object(data.clone());
        let mut worker = tokio::task::spawn_blocking(move || engine.render(&content, &data));

        let body = race("render", self.timeout, &mut worker).await;
        debug!(
            target = SOURCE,
            op = "render",
            result = if body.is_ok() { "ok" } else { "error" },
            template_id = template.id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "template engine finished"
        );

        DocumentShell::new(body?, &template.fonts, format)
            .render_html()
            .map_err(StageError::Failed)
    }
}
