//! Platform-owned liquidity pools.
//!
//! A pool pays users directly (sell-side executions, payouts), as opposed
//! to peer-to-peer movement between two user balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ActionType, Currency};

/// Platform funds for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub currency: Currency,
    /// Funds held by the platform.
    pub balance: Decimal,
    /// Portion of `balance` committed to pending payouts.
    pub reserved: Decimal,
}

impl LiquidityPool {
    #[must_use]
    pub fn empty(currency: Currency) -> Self {
        Self {
            currency,
            balance: Decimal::ZERO,
            reserved: Decimal::ZERO,
        }
    }

    /// Uncommitted funds: `balance − reserved`.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.balance.saturating_sub(self.reserved)
    }
}

/// Result of a liquidity reservation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidityOutcome {
    Passed,
    Blocked,
}

impl std::fmt::Display for LiquidityOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Logged record of one check against a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityCheck {
    pub currency: Currency,
    pub amount: Decimal,
    pub operation: ActionType,
    /// Pool `available` at check time.
    pub available: Decimal,
    /// `amount − available` when blocked, zero otherwise.
    pub shortfall: Decimal,
    pub outcome: LiquidityOutcome,
    pub checked_at: DateTime<Utc>,
}
