//! Audit trail entry types.
//!
//! Every balance-affecting operation, liquidity check and integrity check
//! produces one [`AuditEntry`]. Entries are append-only and hash-chained:
//! each carries the SHA-256 of its predecessor, so rewriting history
//! breaks the chain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AccountId, BalanceRecord, CorrelationId, Currency, LiquidityPool};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Credit,
    Debit,
    Lock,
    Unlock,
    Release,
    PoolCredit,
    PoolPayout,
    PoolReserve,
    PoolReservationReleased,
    LiquidityCheckPassed,
    LiquidityCheckBlocked,
    IntegrityVerified,
    IntegrityMismatch,
    Reconciliation,
    WriteRefused,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
            Self::Lock => "LOCK",
            Self::Unlock => "UNLOCK",
            Self::Release => "RELEASE",
            Self::PoolCredit => "POOL_CREDIT",
            Self::PoolPayout => "POOL_PAYOUT",
            Self::PoolReserve => "POOL_RESERVE",
            Self::PoolReservationReleased => "POOL_RESERVATION_RELEASED",
            Self::LiquidityCheckPassed => "LIQUIDITY_CHECK_PASSED",
            Self::LiquidityCheckBlocked => "LIQUIDITY_CHECK_BLOCKED",
            Self::IntegrityVerified => "INTEGRITY_VERIFIED",
            Self::IntegrityMismatch => "INTEGRITY_MISMATCH",
            Self::Reconciliation => "RECONCILIATION",
            Self::WriteRefused => "WRITE_REFUSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Before/after state of one balance touched by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLeg {
    pub account: AccountId,
    pub currency: Currency,
    pub before: BalanceRecord,
    pub after: BalanceRecord,
}

/// Before/after state of a liquidity pool touched by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLeg {
    pub before: LiquidityPool,
    pub after: LiquidityPool,
}

/// An audit entry before it has been sequenced and chained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub account: Option<AccountId>,
    pub currency: Currency,
    pub amount: Decimal,
    pub correlation_id: CorrelationId,
    pub reference_id: Option<String>,
    pub legs: Vec<BalanceLeg>,
    pub pool: Option<PoolLeg>,
    /// Free-form structured context (per-view values, differences, ...).
    pub details: serde_json::Value,
}

impl AuditDraft {
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        severity: Severity,
        currency: Currency,
        amount: Decimal,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            event_type,
            severity,
            account: None,
            currency,
            amount,
            correlation_id,
            reference_id: None,
            legs: Vec::new(),
            pool: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    #[must_use]
    pub fn reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    #[must_use]
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A sequenced, hash-chained, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, starting at 1.
    pub seq: u64,
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub account: Option<AccountId>,
    pub currency: Currency,
    pub amount: Decimal,
    pub correlation_id: CorrelationId,
    pub reference_id: Option<String>,
    pub legs: Vec<BalanceLeg>,
    pub pool: Option<PoolLeg>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the previous entry (all zeros for the first).
    pub prev_hash: String,
    /// Hex SHA-256 over `prev_hash` and this entry's canonical payload.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Hash of the (non-existent) entry before the first.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Sequence and chain a draft.
    #[must_use]
    pub fn seal(draft: AuditDraft, seq: u64, prev_hash: &str, timestamp: DateTime<Utc>) -> Self {
        let mut entry = Self {
            seq,
            event_type: draft.event_type,
            severity: draft.severity,
            account: draft.account,
            currency: draft.currency,
            amount: draft.amount,
            correlation_id: draft.correlation_id,
            reference_id: draft.reference_id,
            legs: draft.legs,
            pool: draft.pool,
            details: draft.details,
            timestamp,
            prev_hash: prev_hash.to_string(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// Canonical bytes covered by `entry_hash`.
    ///
    /// Format: `"openledger:audit:v1:" || prev_hash || seq || event || severity
    /// || account || currency || amount || correlation || reference || legs
    /// || pool || details || timestamp`
    #[must_use]
    pub fn canonical_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(512);
        payload.extend_from_slice(b"openledger:audit:v1:");
        payload.extend_from_slice(self.prev_hash.as_bytes());
        payload.extend_from_slice(&self.seq.to_le_bytes());
        payload.extend_from_slice(self.event_type.to_string().as_bytes());
        payload.extend_from_slice(self.severity.to_string().as_bytes());
        if let Some(account) = self.account {
            payload.extend_from_slice(account.0.as_bytes());
        }
        payload.extend_from_slice(self.currency.as_str().as_bytes());
        payload.extend_from_slice(self.amount.to_string().as_bytes());
        payload.extend_from_slice(self.correlation_id.0.as_bytes());
        if let Some(reference) = &self.reference_id {
            payload.extend_from_slice(reference.as_bytes());
        }
        for leg in &self.legs {
            payload.extend_from_slice(leg.account.0.as_bytes());
            payload.extend_from_slice(leg.currency.as_str().as_bytes());
            for value in [
                leg.before.available,
                leg.before.locked,
                leg.before.total,
                leg.after.available,
                leg.after.locked,
                leg.after.total,
            ] {
                payload.extend_from_slice(value.to_string().as_bytes());
                payload.push(b'|');
            }
        }
        if let Some(pool) = &self.pool {
            for value in [
                pool.before.balance,
                pool.before.reserved,
                pool.after.balance,
                pool.after.reserved,
            ] {
                payload.extend_from_slice(value.to_string().as_bytes());
                payload.push(b'|');
            }
        }
        payload.extend_from_slice(self.details.to_string().as_bytes());
        payload.extend_from_slice(&self.timestamp.timestamp_micros().to_le_bytes());
        payload
    }

    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_payload());
        hex::encode(hasher.finalize())
    }

    /// The before/after leg for a given balance, if this entry touched it.
    #[must_use]
    pub fn leg(&self, account: AccountId, currency: &Currency) -> Option<&BalanceLeg> {
        self.legs
            .iter()
            .find(|leg| leg.account == account && &leg.currency == currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_entry() -> AuditEntry {
        let account = AccountId::new();
        let mut draft = AuditDraft::new(
            AuditEventType::Credit,
            Severity::Info,
            Currency::new("BTC"),
            dec!(1),
            CorrelationId::new(),
        )
        .account(account)
        .reference("dep-1");
        draft.legs.push(BalanceLeg {
            account,
            currency: Currency::new("BTC"),
            before: BalanceRecord::new(),
            after: BalanceRecord::from_parts(dec!(1), Decimal::ZERO),
        });
        AuditEntry::seal(draft, 1, AuditEntry::GENESIS_HASH, Utc::now())
    }

    #[test]
    fn sealed_hash_matches_recomputation() {
        let entry = make_entry();
        assert_eq!(entry.entry_hash, entry.compute_hash());
        assert_eq!(entry.entry_hash.len(), 64);
    }

    #[test]
    fn tampering_changes_hash() {
        let mut entry = make_entry();
        entry.amount = dec!(2);
        assert_ne!(entry.entry_hash, entry.compute_hash());
    }

    #[test]
    fn leg_lookup() {
        let entry = make_entry();
        let account = entry.account.unwrap();
        assert!(entry.leg(account, &Currency::new("BTC")).is_some());
        assert!(entry.leg(account, &Currency::new("ETH")).is_none());
    }

    #[test]
    fn event_type_display_matches_serde() {
        let json = serde_json::to_string(&AuditEventType::LiquidityCheckBlocked).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditEventType::LiquidityCheckBlocked));
    }
}
