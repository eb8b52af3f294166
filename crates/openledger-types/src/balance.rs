//! Balance tracking types for the OpenLedger escrow model.
//!
//! Every (account, currency) pair has an `available` balance (spendable
//! now), a `locked` balance (reserved for a pending escrow) and a redundant
//! `total` that must always equal `available + locked`.
//!
//! Each record is stored in several [`BalanceView`]s that must describe the
//! same economic fact. Divergence between views is an integrity failure.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Currency, LedgerError, Result};

/// Identity of a balance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BalanceKey {
    pub account: AccountId,
    pub currency: Currency,
}

impl BalanceKey {
    #[must_use]
    pub fn new(account: AccountId, currency: impl Into<Currency>) -> Self {
        Self {
            account,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.currency)
    }
}

/// A single balance record for an (account, currency) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceRecord {
    /// Spendable now.
    pub available: Decimal,
    /// Reserved for pending escrows.
    pub locked: Decimal,
    /// Redundant cache of `available + locked`.
    pub total: Decimal,
}

impl BalanceRecord {
    /// Create a zero balance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// Build a record from its two independent components.
    #[must_use]
    pub fn from_parts(available: Decimal, locked: Decimal) -> Self {
        Self {
            available,
            locked,
            total: available + locked,
        }
    }

    /// [`from_parts`](Self::from_parts), or `None` if the total does not fit
    /// in a `Decimal`.
    #[must_use]
    pub fn checked_from_parts(available: Decimal, locked: Decimal) -> Option<Self> {
        Some(Self {
            available,
            locked,
            total: available.checked_add(locked)?,
        })
    }

    /// Whether this record has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.locked.is_zero() && self.total.is_zero()
    }

    /// Enforce `available ≥ 0`, `locked ≥ 0` and `total == available + locked`.
    ///
    /// # Errors
    /// Returns [`LedgerError::InvariantViolation`] naming the broken rule.
    pub fn check_invariants(&self) -> Result<()> {
        if self.available < Decimal::ZERO {
            return Err(LedgerError::InvariantViolation {
                reason: format!("available is negative: {}", self.available),
            });
        }
        if self.locked < Decimal::ZERO {
            return Err(LedgerError::InvariantViolation {
                reason: format!("locked is negative: {}", self.locked),
            });
        }
        if self.available.checked_add(self.locked) != Some(self.total) {
            return Err(LedgerError::InvariantViolation {
                reason: format!(
                    "total {} != available {} + locked {}",
                    self.total, self.available, self.locked
                ),
            });
        }
        Ok(())
    }

    /// Largest absolute per-field difference against another record.
    #[must_use]
    pub fn max_abs_diff(&self, other: &Self) -> Decimal {
        let diff = |a: Decimal, b: Decimal| a.checked_sub(b).map_or(Decimal::MAX, |d| d.abs());
        diff(self.available, other.available)
            .max(diff(self.locked, other.locked))
            .max(diff(self.total, other.total))
    }
}

impl Default for BalanceRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the redundant stored copies of a balance record.
///
/// The set of views a store maintains is configured in
/// [`LedgerConfig`](crate::LedgerConfig); these are the four the schema
/// history produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceView {
    /// Primary wallet view. Baseline for integrity comparisons.
    Wallet,
    /// Legacy trading view.
    Trading,
    /// Escrow-specific view.
    Escrow,
    /// Internal / admin-facing view.
    Admin,
}

impl BalanceView {
    /// Every known view, primary first.
    pub const ALL: [Self; 4] = [Self::Wallet, Self::Trading, Self::Escrow, Self::Admin];
}

impl fmt::Display for BalanceView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet => write!(f, "WALLET"),
            Self::Trading => write!(f, "TRADING"),
            Self::Escrow => write!(f, "ESCROW"),
            Self::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Which component of a balance record a precondition was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceBucket {
    Available,
    Locked,
}

impl fmt::Display for BalanceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// The resulting balance returned to callers after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account: AccountId,
    pub currency: Currency,
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    /// Sequence number of the audit entry that recorded this state.
    pub audit_seq: u64,
}

impl BalanceSnapshot {
    #[must_use]
    pub fn new(key: &BalanceKey, record: BalanceRecord, audit_seq: u64) -> Self {
        Self {
            account: key.account,
            currency: key.currency.clone(),
            available: record.available,
            locked: record.locked,
            total: record.total,
            audit_seq,
        }
    }

    #[must_use]
    pub fn record(&self) -> BalanceRecord {
        BalanceRecord {
            available: self.available,
            locked: self.locked,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn balance_record_default_is_zero() {
        let record = BalanceRecord::default();
        assert_eq!(record.available, Decimal::ZERO);
        assert_eq!(record.locked, Decimal::ZERO);
        assert!(record.is_zero());
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn from_parts_computes_total() {
        let record = BalanceRecord::from_parts(dec!(0.6), dec!(0.4));
        assert_eq!(record.total, dec!(1.0));
        assert!(!record.is_zero());
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn negative_available_violates_invariant() {
        let record = BalanceRecord::from_parts(dec!(-1), dec!(2));
        let err = record.check_invariants().unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
    }

    #[test]
    fn stale_total_violates_invariant() {
        let record = BalanceRecord {
            available: dec!(1),
            locked: dec!(1),
            total: dec!(3),
        };
        assert!(record.check_invariants().is_err());
    }

    #[test]
    fn max_abs_diff_picks_largest_field() {
        let a = BalanceRecord::from_parts(dec!(1.0), dec!(0.5));
        let b = BalanceRecord::from_parts(dec!(1.2), dec!(0.5));
        assert_eq!(a.max_abs_diff(&b), dec!(0.2));
    }

    #[test]
    fn checked_from_parts_refuses_unrepresentable_total() {
        assert!(BalanceRecord::checked_from_parts(Decimal::MAX, Decimal::ONE).is_none());
        assert_eq!(
            BalanceRecord::checked_from_parts(dec!(2), dec!(1)),
            Some(BalanceRecord::from_parts(dec!(2), dec!(1)))
        );
    }

    #[test]
    fn max_abs_diff_saturates() {
        let a = BalanceRecord::from_parts(Decimal::MAX, Decimal::ZERO);
        let b = BalanceRecord {
            available: Decimal::MIN,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
        };
        assert_eq!(a.max_abs_diff(&b), Decimal::MAX);
    }

    #[test]
    fn view_display_and_order() {
        assert_eq!(BalanceView::ALL[0], BalanceView::Wallet);
        assert_eq!(BalanceView::Escrow.to_string(), "ESCROW");
    }

    #[test]
    fn balance_record_serde_roundtrip() {
        let record = BalanceRecord::from_parts(Decimal::new(12345, 2), Decimal::new(678, 1));
        let json = serde_json::to_string(&record).unwrap();
        let back: BalanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
