use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{RepoError, TemplatesRepo};
use crate::domain::templates::TemplateRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    uuid: Uuid,
    name: String,
    content: String,
    fonts: Vec<String>,
    namespace_id: Option<i64>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TemplateRow> for TemplateRecord {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            content: row.content,
            fonts: row.fonts,
            namespace_id: row.namespace_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl TemplatesRepo for PostgresRepositories {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<TemplateRecord>, RepoError> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, uuid, name, content, fonts, namespace_id, created_at, updated_at
            FROM templates
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TemplateRecord::from))
    }
}
