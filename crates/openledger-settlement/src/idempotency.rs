//! Idempotency guard: at most one side effect per caller-supplied key.
//!
//! Each request is identified by `(account, action_type, key)`. The first
//! sighting inserts a PROCESSING record; the insert has unique-constraint
//! semantics, so of two concurrent duplicates exactly one proceeds. Later
//! duplicates either replay the cached response (COMPLETED) or are told to
//! back off (PROCESSING). Records expire after a fixed TTL and an expired
//! record is treated as absent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use openledger_types::{
    AccountId, ActionType, CorrelationId, IdempotencyKey, IdempotencyRecord, IdempotencyStatus,
    LedgerConfig, LedgerError, Result,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Time source, injectable so TTL expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =================================================================
// Store
// =================================================================

/// Persistence for idempotency records.
pub trait IdempotencyStore: Send + Sync {
    /// Insert a record unless a live one exists for the same key.
    ///
    /// # Errors
    /// [`LedgerError::DuplicateRequest`] if an unexpired record exists.
    fn insert(&self, record: IdempotencyRecord, now: DateTime<Utc>) -> Result<()>;

    /// Live record for `key`. Expired records read as `None`.
    fn get(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>>;

    /// PROCESSING → COMPLETED with `response` attached.
    fn complete(&self, key: &IdempotencyKey, response: serde_json::Value) -> Result<()>;

    /// Delete a PROCESSING record. Returns whether one was removed.
    fn remove_processing(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Drop every expired record. Returns how many were dropped.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn insert(&self, record: IdempotencyRecord, now: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&record.key) {
            if !existing.is_expired(now) {
                return Err(LedgerError::DuplicateRequest {
                    key: record.key.to_string(),
                });
            }
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }

    fn get(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .filter(|r| !r.is_expired(now))
            .cloned())
    }

    fn complete(&self, key: &IdempotencyKey, response: serde_json::Value) -> Result<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(key)
            .ok_or_else(|| LedgerError::Internal(format!("no idempotency record for {key}")))?;
        if record.status != IdempotencyStatus::Processing {
            return Err(LedgerError::Internal(format!(
                "idempotency record {key} is already completed"
            )));
        }
        record.status = IdempotencyStatus::Completed;
        record.cached_response = Some(response);
        Ok(())
    }

    fn remove_processing(&self, key: &IdempotencyKey) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get(key) {
            Some(r) if r.status == IdempotencyStatus::Processing => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}

// =================================================================
// Guard
// =================================================================

/// Outcome of [`IdempotencyGuard::check_and_lock`].
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Empty key: the caller asked for no protection.
    Unprotected,
    /// First sighting: run the operation, then store or release.
    Proceed { correlation_id: CorrelationId },
    /// Already completed: return this cached response instead.
    Replay(serde_json::Value),
}

/// A value produced under idempotency protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Idempotent<T> {
    pub value: T,
    /// `true` if this is a cached response from an earlier request.
    pub replayed: bool,
}

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: chrono::Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl,
        }
    }

    /// Guard over a fresh in-memory store with the configured TTL.
    #[must_use]
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(Arc::new(InMemoryIdempotencyStore::new()), config.idempotency_ttl())
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Claim `key` for this request.
    ///
    /// # Errors
    /// [`LedgerError::ConcurrentRequest`] if an earlier request with the
    /// same key is still PROCESSING.
    pub fn check_and_lock(
        &self,
        account: AccountId,
        action: ActionType,
        key: &str,
    ) -> Result<GuardDecision> {
        if key.is_empty() {
            return Ok(GuardDecision::Unprotected);
        }
        let now = self.clock.now();
        let id = IdempotencyKey::new(account, action, key);
        let record = IdempotencyRecord::processing(id.clone(), now, self.ttl);
        let correlation_id = record.correlation_id;

        match self.store.insert(record, now) {
            Ok(()) => {
                tracing::debug!(
                    key = %id,
                    correlation = %correlation_id,
                    "Idempotency key claimed"
                );
                Ok(GuardDecision::Proceed { correlation_id })
            }
            Err(LedgerError::DuplicateRequest { .. }) => match self.store.get(&id, now)? {
                Some(existing) if existing.status == IdempotencyStatus::Completed => {
                    tracing::info!(
                        key = %id,
                        correlation = %existing.correlation_id,
                        "Duplicate request replayed from cache"
                    );
                    Ok(GuardDecision::Replay(
                        existing.cached_response.unwrap_or(serde_json::Value::Null),
                    ))
                }
                // Still processing, or released between our insert and read.
                _ => {
                    tracing::warn!(key = %id, "Concurrent request with the same idempotency key");
                    Err(LedgerError::ConcurrentRequest { key: id.to_string() })
                }
            },
            Err(err) => Err(err),
        }
    }

    /// Mark the request COMPLETED and cache its response.
    ///
    /// # Errors
    /// `Serialization` if `response` cannot be encoded; `Internal` if the
    /// key was never claimed.
    pub fn store_response<T: Serialize>(
        &self,
        account: AccountId,
        action: ActionType,
        key: &str,
        response: &T,
    ) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        let value = serde_json::to_value(response)?;
        self.store
            .complete(&IdempotencyKey::new(account, action, key), value)
    }

    /// Drop a PROCESSING claim after a failure so a retry can proceed.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn release_lock(&self, account: AccountId, action: ActionType, key: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        let id = IdempotencyKey::new(account, action, key);
        if self.store.remove_processing(&id)? {
            tracing::debug!(key = %id, "Idempotency claim released");
        }
        Ok(())
    }

    /// Run `op` at most once per key.
    ///
    /// `op` receives the correlation id recorded on the idempotency claim
    /// (a fresh one for an unprotected request) so the ledger operations it
    /// runs can carry it into their audit entries.
    ///
    /// On success the serialized result is cached; on failure the claim is
    /// released and the error returned, so retrying under the same key is
    /// always safe.
    ///
    /// # Errors
    /// `ConcurrentRequest` while another request holds the key, or the
    /// error returned by `op`.
    pub fn execute<T, F>(
        &self,
        account: AccountId,
        action: ActionType,
        key: &str,
        op: F,
    ) -> Result<Idempotent<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CorrelationId) -> Result<T>,
    {
        match self.check_and_lock(account, action, key)? {
            GuardDecision::Replay(cached) => Ok(Idempotent {
                value: serde_json::from_value(cached)?,
                replayed: true,
            }),
            GuardDecision::Unprotected => Ok(Idempotent {
                value: op(CorrelationId::new())?,
                replayed: false,
            }),
            GuardDecision::Proceed { correlation_id } => match op(correlation_id) {
                Ok(value) => {
                    self.store_response(account, action, key, &value)?;
                    Ok(Idempotent {
                        value,
                        replayed: false,
                    })
                }
                Err(err) => {
                    self.release_lock(account, action, key)?;
                    Err(err)
                }
            },
        }
    }

    /// Live record for a request, if any.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn record(
        &self,
        account: AccountId,
        action: ActionType,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        self.store
            .get(&IdempotencyKey::new(account, action, key), self.clock.now())
    }

    /// # Errors
    /// Propagates store failures.
    pub fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(self.clock.now())
    }
}
