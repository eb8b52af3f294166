//! Error types for the OpenLedger balance ledger.
//!
//! All errors use the `LG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Amount errors
//! - 2xx: Balance errors
//! - 3xx: Escrow errors
//! - 4xx: Idempotency errors
//! - 5xx: Liquidity errors
//! - 6xx: Integrity errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, BalanceBucket, BalanceView, Currency, EscrowStatus, TradeId};

/// Central error enum for all OpenLedger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // =================================================================
    // Amount Errors (1xx)
    // =================================================================
    /// Non-positive or malformed amount. Rejected before touching storage.
    #[error("LG_ERR_100: Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// Fee percentage outside `[0, 100]`.
    #[error("LG_ERR_101: Invalid fee percent: {0}")]
    InvalidFeePercent(Decimal),

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// A conditional update's precondition failed. Nothing was written.
    #[error(
        "LG_ERR_200: Insufficient {bucket} balance for {account}/{currency}: need {needed}, have {available}"
    )]
    InsufficientBalance {
        account: AccountId,
        currency: Currency,
        bucket: BalanceBucket,
        needed: Decimal,
        available: Decimal,
    },

    /// A stored or computed record broke `available ≥ 0 ∧ locked ≥ 0 ∧
    /// total == available + locked`.
    #[error("LG_ERR_201: Balance invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // Escrow Errors (3xx)
    // =================================================================
    /// No escrow lock exists for this trade.
    #[error("LG_ERR_300: Escrow lock not found: {0}")]
    LockNotFound(TradeId),

    /// The escrow lock is already terminal.
    #[error("LG_ERR_301: Escrow {trade_id} already resolved ({status})")]
    AlreadyResolved {
        trade_id: TradeId,
        status: EscrowStatus,
    },

    /// An escrow lock already exists for this trade.
    #[error("LG_ERR_302: Escrow already exists: {0}")]
    EscrowExists(TradeId),

    // =================================================================
    // Idempotency Errors (4xx)
    // =================================================================
    /// The idempotency key is already present (unique-constraint hit).
    #[error("LG_ERR_400: Duplicate request: {key}")]
    DuplicateRequest { key: String },

    /// The first request with this key is still in flight.
    #[error("LG_ERR_401: Concurrent request in progress: {key}")]
    ConcurrentRequest { key: String },

    // =================================================================
    // Liquidity Errors (5xx)
    // =================================================================
    /// The platform pool cannot cover a payout.
    #[error(
        "LG_ERR_500: Liquidity shortage in {currency}: requested {requested}, available {available}"
    )]
    LiquidityShortage {
        currency: Currency,
        requested: Decimal,
        available: Decimal,
    },

    /// A pool movement would take `reserved` below zero.
    #[error(
        "LG_ERR_501: Reservation shortfall in {currency}: requested {requested}, reserved {reserved}"
    )]
    ReservationShortfall {
        currency: Currency,
        requested: Decimal,
        reserved: Decimal,
    },

    // =================================================================
    // Integrity Errors (6xx)
    // =================================================================
    /// Redundant views disagree beyond tolerance.
    #[error("LG_ERR_600: Integrity mismatch for {account}/{currency}: {reason}")]
    IntegrityMismatch {
        account: AccountId,
        currency: Currency,
        reason: String,
    },

    /// Replayed audit trail disagrees with stored supply.
    #[error("LG_ERR_601: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    /// The store does not maintain the requested view.
    #[error("LG_ERR_602: Unknown balance view: {0}")]
    UnknownView(BalanceView),

    /// An audit entry's hash does not match its content or predecessor.
    #[error("LG_ERR_603: Audit chain broken at seq {seq}")]
    AuditChainBroken { seq: u64 },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("LG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("LG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("LG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// The backing store failed. Distinct from a legitimately empty balance.
    #[error("LG_ERR_903: Storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable taxonomy name surfaced to callers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } | Self::InvalidFeePercent(_) => "INVALID_AMOUNT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::LockNotFound(_) => "LOCK_NOT_FOUND",
            Self::AlreadyResolved { .. } => "ALREADY_RESOLVED",
            Self::EscrowExists(_) => "ESCROW_EXISTS",
            Self::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            Self::ConcurrentRequest { .. } => "CONCURRENT_REQUEST",
            Self::LiquidityShortage { .. } | Self::ReservationShortfall { .. } => {
                "LIQUIDITY_SHORTAGE"
            }
            Self::IntegrityMismatch { .. }
            | Self::SupplyInvariantViolation { .. }
            | Self::UnknownView(_)
            | Self::AuditChainBroken { .. } => "INTEGRITY_MISMATCH",
            Self::Internal(_) => "INTERNAL",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Whether a caller may back off and retry under the same idempotency key.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentRequest { .. } | Self::Storage(_))
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_display() {
        let err = LedgerError::InsufficientBalance {
            account: AccountId::new(),
            currency: Currency::new("USDT"),
            bucket: BalanceBucket::Available,
            needed: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };
        let msg = format!("{err}");
        assert!(msg.starts_with("LG_ERR_200"), "Got: {msg}");
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn already_resolved_display() {
        let err = LedgerError::AlreadyResolved {
            trade_id: TradeId::new(),
            status: EscrowStatus::Released,
        };
        let msg = format!("{err}");
        assert!(msg.contains("LG_ERR_301"));
        assert!(msg.contains("RELEASED"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(LedgerError::ConcurrentRequest { key: "k".into() }.is_retryable());
        assert!(LedgerError::Storage("down".into()).is_retryable());
        let mismatch = LedgerError::IntegrityMismatch {
            account: AccountId::new(),
            currency: Currency::new("BTC"),
            reason: "views differ".into(),
        };
        assert!(!mismatch.is_retryable());
        assert_eq!(mismatch.code(), "INTEGRITY_MISMATCH");
    }

    #[test]
    fn all_errors_have_lg_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(LedgerError::LockNotFound(TradeId::new())),
            Box::new(LedgerError::DuplicateRequest { key: "k".into() }),
            Box::new(LedgerError::InvalidFeePercent(Decimal::new(101, 0))),
            Box::new(LedgerError::Internal("test".into())),
            Box::new(LedgerError::LiquidityShortage {
                currency: Currency::new("BTC"),
                requested: Decimal::ONE,
                available: Decimal::ZERO,
            }),
            Box::new(LedgerError::ReservationShortfall {
                currency: Currency::new("USDT"),
                requested: Decimal::ONE,
                reserved: Decimal::ZERO,
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("LG_ERR_"),
                "Error missing LG_ERR_ prefix: {msg}"
            );
        }
    }
}
