//! Idempotency records: deduplication of caller-retried requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, ActionType, CorrelationId};

/// Identity of an idempotency record: `(account, action_type, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub account: AccountId,
    pub action_type: ActionType,
    pub key: String,
}

impl IdempotencyKey {
    #[must_use]
    pub fn new(account: AccountId, action_type: ActionType, key: impl Into<String>) -> Self {
        Self {
            account,
            action_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.account, self.action_type, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// The first request is executing.
    Processing,
    /// The first request finished; `cached_response` holds its result.
    Completed,
}

/// One deduplicated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub status: IdempotencyStatus,
    pub cached_response: Option<serde_json::Value>,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A fresh PROCESSING record.
    #[must_use]
    pub fn processing(key: IdempotencyKey, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            key,
            status: IdempotencyStatus::Processing,
            cached_response: None,
            correlation_id: CorrelationId::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_record_expires_after_ttl() {
        let now = Utc::now();
        let key = IdempotencyKey::new(AccountId::new(), ActionType::Withdrawal, "w-1");
        let record = IdempotencyRecord::processing(key, now, chrono::Duration::hours(24));
        assert_eq!(record.status, IdempotencyStatus::Processing);
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + chrono::Duration::hours(24)));
    }

    #[test]
    fn key_display_includes_all_parts() {
        let account = AccountId::new();
        let key = IdempotencyKey::new(account, ActionType::Deposit, "abc");
        let s = key.to_string();
        assert!(s.contains(&account.to_string()));
        assert!(s.ends_with(":deposit:abc"));
    }
}
