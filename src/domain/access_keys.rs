//! Access keys and their usage quota.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A tenant-facing key that authorizes PDF generation against a usage quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyRecord {
    pub id: i64,
    pub name: String,
    pub value: String,
    pub usage_count: i64,
    pub usage_limit: i64,
    pub owner_id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AccessKeyRecord {
    /// Whether another generation may be admitted for this key.
    pub fn has_remaining_quota(&self) -> bool {
        self.usage_count < self.usage_limit
    }

    pub fn remaining(&self) -> i64 {
        (self.usage_limit - self.usage_count).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(usage_count: i64, usage_limit: i64) -> AccessKeyRecord {
        AccessKeyRecord {
            id: 1,
            name: "primary".to_string(),
            value: "dmp_test".to_string(),
            usage_count,
            usage_limit,
            owner_id: 7,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn quota_is_exhausted_at_the_limit() {
        assert!(key(9, 10).has_remaining_quota());
        assert!(!key(10, 10).has_remaining_quota());
        assert!(!key(12, 10).has_remaining_quota());
    }

    #[test]
    fn remaining_never_goes_negative() {
        assert_eq!(key(3, 10).remaining(), 7);
        assert_eq!(key(12, 10).remaining(), 0);
    }
}
