use sqlx::query;

use crate::application::repos::{GenerationLogsRepo, RepoError};
use crate::domain::generation_logs::NewGenerationLog;

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait::async_trait]
impl GenerationLogsRepo for PostgresRepositories {
    async fn append(&self, entry: NewGenerationLog) -> Result<(), RepoError> {
        query(
            r#"
            INSERT INTO generation_logs
                (key_id, template_id, called_at, request_body, response_body, status_code, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.key_id)
        .bind(entry.template_id)
        .bind(entry.called_at)
        .bind(entry.request_body)
        .bind(sqlx::types::Json(entry.response_body))
        .bind(i32::from(entry.status_code))
        .bind(entry.error_message)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
