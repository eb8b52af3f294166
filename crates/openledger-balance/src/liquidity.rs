//! Liquidity Reservation Checker.
//!
//! Guards every payout drawn from a platform-owned pool. A check reads the
//! pool's uncommitted balance, records a PASSED or BLOCKED audit entry and
//! refuses the operation on shortfall. The check itself never debits; the
//! balance service performs the debit in the same conditional commit that
//! credits the user.

use std::sync::Arc;

use chrono::Utc;
use openledger_types::{
    validate_amount, ActionType, AuditDraft, AuditEventType, CurrencyRegistry, Currency,
    LedgerError, LiquidityCheck, LiquidityOutcome, LiquidityPool, Operation, Result, Severity,
};
use rust_decimal::Decimal;
use serde_json::json;

use crate::store::{LedgerStore, Mutation, WriteBatch};

/// Reads, checks and maintains platform liquidity pools.
pub struct LiquidityChecker {
    store: Arc<dyn LedgerStore>,
    currencies: CurrencyRegistry,
}

impl LiquidityChecker {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, currencies: CurrencyRegistry) -> Self {
        Self { store, currencies }
    }

    /// Current pool state.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn pool(&self, currency: &Currency) -> Result<LiquidityPool> {
        self.store.pool(currency)
    }

    /// Evaluate a payout against the pool without recording anything.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn evaluate(
        &self,
        currency: &Currency,
        amount: Decimal,
        operation: ActionType,
    ) -> Result<LiquidityCheck> {
        let pool = self.store.pool(currency)?;
        let available = pool.available();
        let (outcome, shortfall) = if available < amount {
            (LiquidityOutcome::Blocked, amount - available)
        } else {
            (LiquidityOutcome::Passed, Decimal::ZERO)
        };
        Ok(LiquidityCheck {
            currency: currency.clone(),
            amount,
            operation,
            available,
            shortfall,
            outcome,
            checked_at: Utc::now(),
        })
    }

    /// Check the pool can cover `amount` and log the outcome.
    ///
    /// # Errors
    /// Returns [`LedgerError::LiquidityShortage`] when blocked, after the
    /// BLOCKED entry has been written.
    pub fn check_and_log(
        &self,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<LiquidityCheck> {
        validate_amount(amount, self.currencies.precision(currency))?;
        let check = self.evaluate(currency, amount, op.action_type)?;

        let (event, severity) = match check.outcome {
            LiquidityOutcome::Passed => (AuditEventType::LiquidityCheckPassed, Severity::Info),
            LiquidityOutcome::Blocked => (AuditEventType::LiquidityCheckBlocked, Severity::Warning),
        };
        let draft = AuditDraft::new(event, severity, currency.clone(), amount, op.correlation_id)
            .reference(op.reference_id.clone())
            .details(json!({
                "operation": op.action_type,
                "available": check.available,
                "shortfall": check.shortfall,
            }));
        self.store.append_audit(draft)?;

        match check.outcome {
            LiquidityOutcome::Passed => {
                tracing::debug!(
                    currency = %currency,
                    amount = %amount,
                    available = %check.available,
                    operation = %op.action_type,
                    "Liquidity check passed"
                );
                Ok(check)
            }
            LiquidityOutcome::Blocked => {
                tracing::warn!(
                    currency = %currency,
                    amount = %amount,
                    available = %check.available,
                    shortfall = %check.shortfall,
                    operation = %op.action_type,
                    "Liquidity check blocked"
                );
                Err(LedgerError::LiquidityShortage {
                    currency: currency.clone(),
                    requested: amount,
                    available: check.available,
                })
            }
        }
    }

    /// Record platform funds arriving in a pool.
    ///
    /// # Errors
    /// `InvalidAmount` for a bad amount; store failures.
    pub fn credit_pool(
        &self,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<LiquidityPool> {
        self.apply(currency, amount, Decimal::ZERO, AuditEventType::PoolCredit, op)
    }

    /// Earmark part of a pool for a pending payout, later paid with
    /// [`AtomicBalanceService::pay_out_reserved`](crate::AtomicBalanceService::pay_out_reserved).
    ///
    /// # Errors
    /// `LiquidityShortage` if the pool's available balance cannot cover it.
    pub fn reserve(
        &self,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<LiquidityPool> {
        self.apply(currency, Decimal::ZERO, amount, AuditEventType::PoolReserve, op)
    }

    /// Return a reservation to the pool's available balance.
    ///
    /// # Errors
    /// `ReservationShortfall` if more is released than is reserved.
    pub fn release_reservation(
        &self,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<LiquidityPool> {
        self.apply(
            currency,
            Decimal::ZERO,
            -amount,
            AuditEventType::PoolReservationReleased,
            op,
        )
    }

    fn apply(
        &self,
        currency: &Currency,
        balance: Decimal,
        reserved: Decimal,
        event: AuditEventType,
        op: &Operation,
    ) -> Result<LiquidityPool> {
        let amount = balance.abs().max(reserved.abs());
        validate_amount(amount, self.currencies.precision(currency))?;
        let receipt = self.store.commit(WriteBatch {
            mutations: vec![Mutation::pool(currency, balance, reserved)],
            audit: AuditDraft::new(
                event,
                Severity::Info,
                currency.clone(),
                amount,
                op.correlation_id,
            )
            .reference(op.reference_id.clone()),
        })?;
        let pool = receipt
            .pool
            .map(|leg| leg.after)
            .ok_or_else(|| LedgerError::Internal("pool commit returned no pool state".into()))?;
        tracing::info!(
            currency = %currency,
            event = %event,
            amount = %amount,
            balance = %pool.balance,
            reserved = %pool.reserved,
            "Liquidity pool updated"
        );
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use openledger_types::{BalanceView, LedgerConfig};
    use rust_decimal_macros::dec;

    fn checker() -> (Arc<dyn LedgerStore>, LiquidityChecker) {
        let store: Arc<dyn LedgerStore> =
            Arc::new(InMemoryLedgerStore::new(BalanceView::ALL.to_vec()).unwrap());
        let checker = LiquidityChecker::new(Arc::clone(&store), LedgerConfig::default().registry());
        (store, checker)
    }

    fn op() -> Operation {
        Operation::new(ActionType::Payout, "payout-1")
    }

    #[test]
    fn passed_check_is_logged() {
        let (store, checker) = checker();
        let btc = Currency::new("BTC");
        checker.credit_pool(&btc, dec!(5), &op()).unwrap();

        let check = checker.check_and_log(&btc, dec!(2), &op()).unwrap();
        assert_eq!(check.outcome, LiquidityOutcome::Passed);
        assert_eq!(check.available, dec!(5));

        let last = store.audit_entries().unwrap().pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::LiquidityCheckPassed);
        // the check never debits
        assert_eq!(checker.pool(&btc).unwrap().balance, dec!(5));
    }

    #[test]
    fn shortfall_blocks_and_logs_warning() {
        let (store, checker) = checker();
        let btc = Currency::new("BTC");
        checker.credit_pool(&btc, dec!(1), &op()).unwrap();

        let err = checker.check_and_log(&btc, dec!(1.5), &op()).unwrap_err();
        assert!(matches!(err, LedgerError::LiquidityShortage { .. }));
        assert_eq!(err.code(), "LIQUIDITY_SHORTAGE");

        let last = store.audit_entries().unwrap().pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::LiquidityCheckBlocked);
        assert_eq!(last.severity, Severity::Warning);
        assert_eq!(last.details["shortfall"], json!(dec!(0.5)));
    }

    #[test]
    fn reservations_reduce_available() {
        let (_store, checker) = checker();
        let usdt = Currency::new("USDT");
        checker.credit_pool(&usdt, dec!(100), &op()).unwrap();
        let pool = checker.reserve(&usdt, dec!(60), &op()).unwrap();
        assert_eq!(pool.available(), dec!(40));

        assert!(checker.check_and_log(&usdt, dec!(50), &op()).is_err());
        assert!(matches!(
            checker.reserve(&usdt, dec!(41), &op()),
            Err(LedgerError::LiquidityShortage { .. })
        ));

        let pool = checker.release_reservation(&usdt, dec!(60), &op()).unwrap();
        assert_eq!(pool.available(), dec!(100));
        assert!(matches!(
            checker.release_reservation(&usdt, dec!(1), &op()),
            Err(LedgerError::ReservationShortfall { .. })
        ));
    }

    #[test]
    fn unknown_pool_is_empty() {
        let (_store, checker) = checker();
        let err = checker
            .check_and_log(&Currency::new("DOGE"), dec!(1), &op())
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LiquidityShortage { available, .. } if available.is_zero()
        ));
    }

    #[test]
    fn rejects_invalid_amounts() {
        let (_store, checker) = checker();
        let btc = Currency::new("BTC");
        assert!(matches!(
            checker.credit_pool(&btc, Decimal::ZERO, &op()),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(checker.check_and_log(&btc, dec!(-1), &op()).is_err());
    }
}
