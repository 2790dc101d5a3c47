//! Admission against per-key usage quotas.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::repos::{AccessKeysRepo, RepoError};

const SOURCE: &str = "application::quota";

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no access key provided")]
    MissingKey,
    #[error("access key not found")]
    KeyNotFound,
    #[error("usage limit reached ({used}/{limit})")]
    QuotaExceeded { key_id: i64, used: i64, limit: i64 },
    #[error("key store unavailable")]
    Unavailable(#[source] RepoError),
}

impl AdmissionError {
    /// Key id to record in the audit trail, when the key was resolved.
    pub fn key_id(&self) -> Option<i64> {
        match self {
            Self::QuotaExceeded { key_id, .. } => Some(*key_id),
            _ => None,
        }
    }
}

/// An admitted key with the usage snapshot taken at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub key_id: i64,
    pub owner_id: i64,
    pub usage_count: i64,
    pub usage_limit: i64,
}

#[derive(Clone)]
pub struct QuotaGate {
    keys: Arc<dyn AccessKeysRepo>,
}

impl QuotaGate {
    pub fn new(keys: Arc<dyn AccessKeysRepo>) -> Self {
        Self { keys }
    }

    /// Check the key exists and still has quota. Never mutates usage.
    pub async fn admit(&self, key_value: Option<&str>) -> Result<KeyHandle, AdmissionError> {
        let value = key_value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AdmissionError::MissingKey)?;

        let record = self
            .keys
            .find_by_value(value)
            .await
            .map_err(AdmissionError::Unavailable)?
            .ok_or(AdmissionError::KeyNotFound)?;

        if !record.has_remaining_quota() {
            debug!(
                target = SOURCE,
                op = "admit",
                result = "quota_exceeded",
                key_id = record.id,
                used = record.usage_count,
                limit = record.usage_limit,
                "rejecting key over quota"
            );
            return Err(AdmissionError::QuotaExceeded {
                key_id: record.id,
                used: record.usage_count,
                limit: record.usage_limit,
            });
        }

        Ok(KeyHandle {
            key_id: record.id,
            owner_id: record.owner_id,
            usage_count: record.usage_count,
            usage_limit: record.usage_limit,
        })
    }

    /// Atomically count one generation against the key.
    pub async fn record_usage(&self, handle: &KeyHandle) -> Result<(), RepoError> {
        self.keys.increment_usage(handle.key_id).await
    }
}
