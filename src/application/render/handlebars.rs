use handlebars::Handlebars;
use serde_json::Value;

use super::TemplateEngine;
use crate::application::stage::EngineError;

/// Handlebars in non-strict mode: unknown variables render as empty text.
pub struct HandlebarsEngine {
    registry: Handlebars<'static>,
}

impl HandlebarsEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        Self { registry }
    }
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for HandlebarsEngine {
    fn render(&self, content: &str, data: &Value) -> Result<String, EngineError> {
        self.registry
            .render_template(content, data)
            .map_err(|err| EngineError::new(err.to_string()))
    }
}
