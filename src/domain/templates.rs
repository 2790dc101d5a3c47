//! Stored document templates.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Template content as the pipeline sees it. The public `uuid` is what callers
/// reference; `id` only links generation logs back to the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub content: String,
    pub fonts: Vec<String>,
    pub namespace_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TemplateRecord {
    pub fn primary_font(&self) -> Option<&str> {
        self.fonts
            .iter()
            .map(|font| font.trim())
            .find(|font| !font.is_empty())
    }
}
