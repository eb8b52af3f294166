//! Escrow Settlement Engine.
//!
//! Per-trade state machine `NONE → LOCKED → RELEASED | CANCELLED`, built
//! entirely on the balance service's lock / unlock / release primitives.
//! The engine never writes balance fields itself.
//!
//! Resolution is serialized per engine: the lock table is held across the
//! balance call, so a concurrent second release or cancel always observes
//! the terminal state and fails with `ALREADY_RESOLVED` instead of
//! re-applying the transition.

use std::collections::HashMap;
use std::sync::Arc;

use openledger_balance::{AtomicBalanceService, ReleaseReceipt};
use openledger_types::{
    AccountId, ActionType, Currency, EscrowLock, EscrowStatus, LedgerError, Operation, Result,
    TradeId,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =================================================================
// Fee schedule
// =================================================================

/// Source of settlement fee percentages.
pub trait FeeSchedule: Send + Sync {
    /// Fee percent (0–100) for an operation in a currency.
    fn fee_percent(&self, action: ActionType, currency: &Currency) -> Decimal;
}

/// Fee schedule with one default percent and per-action overrides.
#[derive(Debug, Clone, Default)]
pub struct FixedFeeSchedule {
    default_percent: Decimal,
    overrides: HashMap<ActionType, Decimal>,
}

impl FixedFeeSchedule {
    #[must_use]
    pub fn new(default_percent: Decimal) -> Self {
        Self {
            default_percent,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, action: ActionType, percent: Decimal) -> Self {
        self.overrides.insert(action, percent);
        self
    }
}

impl FeeSchedule for FixedFeeSchedule {
    fn fee_percent(&self, action: ActionType, _currency: &Currency) -> Decimal {
        self.overrides
            .get(&action)
            .copied()
            .unwrap_or(self.default_percent)
    }
}

// =================================================================
// Engine
// =================================================================

/// A released escrow and the balance movements it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSettlement {
    pub lock: EscrowLock,
    pub receipt: ReleaseReceipt,
}

pub struct EscrowEngine {
    balances: Arc<AtomicBalanceService>,
    locks: Mutex<HashMap<TradeId, EscrowLock>>,
}

impl EscrowEngine {
    #[must_use]
    pub fn new(balances: Arc<AtomicBalanceService>) -> Self {
        Self {
            balances,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn balances(&self) -> &Arc<AtomicBalanceService> {
        &self.balances
    }

    /// Lock `amount` of the trader's funds for `trade_id`.
    ///
    /// # Errors
    /// - `EscrowExists` if the trade already has a lock (no funds move)
    /// - `InsufficientBalance` if the trader cannot cover `amount`
    pub fn open_escrow(
        &self,
        trader: AccountId,
        currency: &Currency,
        amount: Decimal,
        trade_id: TradeId,
    ) -> Result<EscrowLock> {
        let mut locks = self.locks.lock();
        if locks.contains_key(&trade_id) {
            return Err(LedgerError::EscrowExists(trade_id));
        }

        let op = Operation::new(ActionType::EscrowOpen, trade_id.to_string());
        self.balances.lock(trader, currency, amount, &op)?;

        let lock = EscrowLock::open(trade_id, trader, currency.clone(), amount);
        locks.insert(trade_id, lock.clone());
        tracing::info!(
            trade = %trade_id,
            trader = %trader,
            currency = %currency,
            amount = %amount,
            "Escrow opened"
        );
        Ok(lock)
    }

    /// Pay the locked amount to `buyer`, minus `fee_percent` to the fee account.
    ///
    /// # Errors
    /// - `LockNotFound` if the trade was never opened
    /// - `AlreadyResolved` if it is already RELEASED or CANCELLED
    /// - `InvalidFeePercent` for a percent outside `[0, 100]`
    pub fn release_escrow(
        &self,
        trade_id: TradeId,
        buyer: AccountId,
        fee_percent: Decimal,
    ) -> Result<EscrowSettlement> {
        let mut locks = self.locks.lock();
        let lock = locks
            .get_mut(&trade_id)
            .ok_or(LedgerError::LockNotFound(trade_id))?;
        lock.ensure_locked()?;

        let op = Operation::new(ActionType::EscrowRelease, trade_id.to_string());
        let receipt = self.balances.release(
            lock.trader_id,
            &lock.currency,
            lock.amount,
            buyer,
            fee_percent,
            &op,
        )?;
        lock.mark_released(buyer, receipt.split)?;

        tracing::info!(
            trade = %trade_id,
            trader = %lock.trader_id,
            buyer = %buyer,
            net = %receipt.split.net,
            fee = %receipt.split.fee,
            "Escrow released"
        );
        Ok(EscrowSettlement {
            lock: lock.clone(),
            receipt,
        })
    }

    /// Release with the fee percent taken from `schedule`.
    ///
    /// # Errors
    /// As [`release_escrow`](Self::release_escrow).
    pub fn settle_with_schedule(
        &self,
        trade_id: TradeId,
        buyer: AccountId,
        schedule: &dyn FeeSchedule,
    ) -> Result<EscrowSettlement> {
        let currency = self
            .get(trade_id)
            .map(|l| l.currency)
            .ok_or(LedgerError::LockNotFound(trade_id))?;
        let fee_percent = schedule.fee_percent(ActionType::EscrowRelease, &currency);
        self.release_escrow(trade_id, buyer, fee_percent)
    }

    /// Return the locked amount to the trader.
    ///
    /// # Errors
    /// - `LockNotFound` if the trade was never opened
    /// - `AlreadyResolved` if it is already RELEASED or CANCELLED
    pub fn cancel_escrow(&self, trade_id: TradeId) -> Result<EscrowLock> {
        let mut locks = self.locks.lock();
        let lock = locks
            .get_mut(&trade_id)
            .ok_or(LedgerError::LockNotFound(trade_id))?;
        lock.ensure_locked()?;

        let op = Operation::new(ActionType::EscrowCancel, trade_id.to_string());
        self.balances
            .unlock(lock.trader_id, &lock.currency, lock.amount, &op)?;
        lock.mark_cancelled()?;

        tracing::info!(
            trade = %trade_id,
            trader = %lock.trader_id,
            amount = %lock.amount,
            "Escrow cancelled"
        );
        Ok(lock.clone())
    }

    #[must_use]
    pub fn get(&self, trade_id: TradeId) -> Option<EscrowLock> {
        self.locks.lock().get(&trade_id).cloned()
    }

    /// Number of locks currently in LOCKED state.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|l| l.status == EscrowStatus::Locked)
            .count()
    }
}
