//! # EscrowLock: funds reserved for one pending trade
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  release   ┌──────────┐
//!   │ LOCKED ├───────────▶│ RELEASED │
//!   └───┬────┘            └──────────┘
//!       │ cancel
//!       ▼
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```
//!
//! A lock is created in LOCKED and becomes terminal exactly once. Terminal
//! locks are never revived.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Currency, FeeSplit, LedgerError, Result, TradeId};

/// The lifecycle state of an escrow lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Funds are held in the trader's `locked` balance.
    Locked,
    /// Funds were paid to the counterparty (minus fee).
    Released,
    /// Funds were returned to the trader's `available` balance.
    Cancelled,
}

impl EscrowStatus {
    /// Can a lock in this state transition to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Locked, Self::Released | Self::Cancelled)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Locked)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Funds reserved for a trade, keyed by `trade_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub trade_id: TradeId,
    /// The account whose balance was locked.
    pub trader_id: AccountId,
    pub currency: Currency,
    /// Gross amount held.
    pub amount: Decimal,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the lock becomes terminal.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Counterparty paid on release.
    pub buyer_id: Option<AccountId>,
    /// Net/fee split applied on release.
    pub settlement: Option<FeeSplit>,
}

impl EscrowLock {
    /// A freshly opened lock in LOCKED state.
    #[must_use]
    pub fn open(
        trade_id: TradeId,
        trader_id: AccountId,
        currency: Currency,
        amount: Decimal,
    ) -> Self {
        Self {
            trade_id,
            trader_id,
            currency,
            amount,
            status: EscrowStatus::Locked,
            created_at: Utc::now(),
            resolved_at: None,
            buyer_id: None,
            settlement: None,
        }
    }

    /// Ensure the lock can still be resolved.
    ///
    /// # Errors
    /// Returns [`LedgerError::AlreadyResolved`] if the lock is terminal.
    pub fn ensure_locked(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved {
                trade_id: self.trade_id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Transition to RELEASED.
    ///
    /// # Errors
    /// Returns [`LedgerError::AlreadyResolved`] if not LOCKED.
    pub fn mark_released(&mut self, buyer_id: AccountId, split: FeeSplit) -> Result<()> {
        self.transition(EscrowStatus::Released)?;
        self.buyer_id = Some(buyer_id);
        self.settlement = Some(split);
        Ok(())
    }

    /// Transition to CANCELLED.
    ///
    /// # Errors
    /// Returns [`LedgerError::AlreadyResolved`] if not LOCKED.
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.transition(EscrowStatus::Cancelled)
    }

    fn transition(&mut self, target: EscrowStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LedgerError::AlreadyResolved {
                trade_id: self.trade_id,
                status: self.status,
            });
        }
        self.status = target;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}
