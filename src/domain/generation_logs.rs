//! Audit records written once per generation request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Identifier recorded when the key or template was never resolved.
pub const UNRESOLVED_ID: i64 = 0;

/// Persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLogRecord {
    pub id: i64,
    pub key_id: i64,
    pub template_id: i64,
    pub called_at: OffsetDateTime,
    pub request_body: String,
    pub response_body: Value,
    pub status_code: i32,
    pub error_message: String,
}

/// Audit record ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGenerationLog {
    pub key_id: i64,
    pub template_id: i64,
    pub called_at: OffsetDateTime,
    pub request_body: String,
    pub response_body: Value,
    pub status_code: u16,
    pub error_message: String,
}

impl NewGenerationLog {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
