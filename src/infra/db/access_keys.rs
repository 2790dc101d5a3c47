use sqlx::query;
use time::OffsetDateTime;

use crate::application::repos::{AccessKeysRepo, RepoError};
use crate::domain::access_keys::AccessKeyRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct AccessKeyRow {
    id: i64,
    name: String,
    value: String,
    usage_count: i64,
    usage_limit: i64,
    owner_id: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<AccessKeyRow> for AccessKeyRecord {
    fn from(row: AccessKeyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            value: row.value,
            usage_count: row.usage_count,
            usage_limit: row.usage_limit,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl AccessKeysRepo for PostgresRepositories {
    async fn find_by_value(&self, value: &str) -> Result<Option<AccessKeyRecord>, RepoError> {
        let row = sqlx::query_as::<_, AccessKeyRow>(
            r#"
            SELECT id, name, value, usage_count, usage_limit, owner_id, created_at, updated_at
            FROM access_keys
            WHERE value = $1
            "#,
        )
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(AccessKeyRecord::from))
    }

    async fn increment_usage(&self, id: i64) -> Result<(), RepoError> {
        let result = query(
            r#"
            UPDATE access_keys
            SET usage_count = usage_count + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
