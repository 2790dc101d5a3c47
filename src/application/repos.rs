//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::access_keys::AccessKeyRecord;
use crate::domain::generation_logs::NewGenerationLog;
use crate::domain::templates::TemplateRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Key store consulted by the quota gate.
#[async_trait]
pub trait AccessKeysRepo: Send + Sync {
    async fn find_by_value(&self, value: &str) -> Result<Option<AccessKeyRecord>, RepoError>;

    /// Atomically add one to the key's usage counter.
    async fn increment_usage(&self, id: i64) -> Result<(), RepoError>;
}

#[async_trait]
pub trait TemplatesRepo: Send + Sync {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<TemplateRecord>, RepoError>;
}

/// Append-only store for generation audit records.
#[async_trait]
pub trait GenerationLogsRepo: Send + Sync {
    async fn append(&self, entry: NewGenerationLog) -> Result<(), RepoError>;
}
