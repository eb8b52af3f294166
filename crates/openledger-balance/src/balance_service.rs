//! Atomic Balance Service.
//!
//! The only component allowed to change a balance. Every primitive is a
//! single conditional commit: the store checks the precondition against the
//! value it holds at write time, replicates the result to every redundant
//! view and appends one audit entry, or writes nothing at all.
//!
//! | Primitive | available | locked | Precondition |
//! |-----------|-----------|--------|--------------|
//! | `credit`  | `+a`      |        | none |
//! | `debit`   | `-a`      |        | `available ≥ a` |
//! | `lock`    | `-a`      | `+a`   | `available ≥ a` |
//! | `unlock`  | `+a`      | `-a`   | `locked ≥ a` |
//! | `release` |           | `-a`   | `locked ≥ a`, then net to destination and fee to the fee account |

use std::sync::Arc;

use openledger_types::{
    validate_amount, AccountId, AuditDraft, AuditEventType, BalanceKey, BalanceRecord,
    BalanceSnapshot, Currency, CurrencyRegistry, FeeSplit, LedgerConfig, LedgerError,
    LiquidityPool, Operation, Result, Severity,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::liquidity::LiquidityChecker;
use crate::store::{CommitReceipt, InMemoryLedgerStore, LedgerStore, Mutation, WriteBatch};

/// Result of a [`AtomicBalanceService::release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub source: BalanceSnapshot,
    pub destination: BalanceSnapshot,
    /// Fee account after the release. `None` when the fee rounded to zero.
    pub fee: Option<BalanceSnapshot>,
    pub split: FeeSplit,
}

/// Credit / debit / lock / unlock / release over a [`LedgerStore`].
pub struct AtomicBalanceService {
    store: Arc<dyn LedgerStore>,
    currencies: CurrencyRegistry,
    fee_account: AccountId,
    liquidity: LiquidityChecker,
}

impl AtomicBalanceService {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        let currencies = config.registry();
        Self {
            liquidity: LiquidityChecker::new(Arc::clone(&store), currencies.clone()),
            store,
            currencies,
            fee_account: config.fee_account,
        }
    }

    /// Service over a fresh in-memory store.
    ///
    /// # Errors
    /// Returns `Configuration` if the config is invalid.
    pub fn in_memory(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::from_config(config)?);
        Ok(Self::new(store, config))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    #[must_use]
    pub fn liquidity(&self) -> &LiquidityChecker {
        &self.liquidity
    }

    #[must_use]
    pub fn currencies(&self) -> &CurrencyRegistry {
        &self.currencies
    }

    #[must_use]
    pub fn fee_account(&self) -> AccountId {
        self.fee_account
    }

    /// Primary-view balance. Never-seen balances are zero.
    ///
    /// # Errors
    /// Propagates store failures; these are never reported as zero.
    pub fn balance(&self, account: AccountId, currency: &Currency) -> Result<BalanceRecord> {
        self.store.read(&BalanceKey::new(account, currency.clone()))
    }

    // =================================================================
    // Primitives
    // =================================================================

    /// Increase `available`.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive or over-precise amounts.
    pub fn credit(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        self.apply(account, currency, amount, amount, Decimal::ZERO, AuditEventType::Credit, op)
    }

    /// Decrease `available`.
    ///
    /// # Errors
    /// `InsufficientBalance` if `available < amount` at write time.
    pub fn debit(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        self.apply(account, currency, amount, -amount, Decimal::ZERO, AuditEventType::Debit, op)
    }

    /// Move `amount` from `available` to `locked`.
    ///
    /// # Errors
    /// `InsufficientBalance` if `available < amount` at write time.
    pub fn lock(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        self.apply(account, currency, amount, -amount, amount, AuditEventType::Lock, op)
    }

    /// Move `amount` from `locked` back to `available`.
    ///
    /// # Errors
    /// `InsufficientBalance` (locked bucket) if `locked < amount`.
    pub fn unlock(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        self.apply(account, currency, amount, amount, -amount, AuditEventType::Unlock, op)
    }

    /// Take `amount` out of `source`'s locked balance, credit the net to
    /// `destination` and the fee to the fee account, as one commit with one
    /// audit entry.
    ///
    /// # Errors
    /// `InvalidAmount` / `InvalidFeePercent` before touching storage;
    /// `InsufficientBalance` if `source.locked < amount`.
    pub fn release(
        &self,
        source: AccountId,
        currency: &Currency,
        amount: Decimal,
        destination: AccountId,
        fee_percent: Decimal,
        op: &Operation,
    ) -> Result<ReleaseReceipt> {
        let precision = self.currencies.precision(currency);
        validate_amount(amount, precision)?;
        let split = FeeSplit::compute(amount, fee_percent, precision)?;
        debug_assert!(split.is_conserving());

        let mut mutations = vec![
            Mutation::balance(source, currency, Decimal::ZERO, -split.gross),
            Mutation::balance(destination, currency, split.net, Decimal::ZERO),
        ];
        if !split.fee.is_zero() {
            mutations.push(Mutation::balance(self.fee_account, currency, split.fee, Decimal::ZERO));
        }
        let audit = self
            .draft(AuditEventType::Release, source, currency, amount, op)
            .details(json!({
                "action_type": op.action_type,
                "destination": destination,
                "fee_account": self.fee_account,
                "fee_percent": fee_percent,
                "net": split.net,
                "fee": split.fee,
            }));
        let receipt = self.commit(WriteBatch { mutations, audit }, source, currency)?;

        let snapshot = |account: AccountId| -> Result<BalanceSnapshot> {
            let key = BalanceKey::new(account, currency.clone());
            let after = receipt
                .after(&key)
                .ok_or_else(|| LedgerError::Internal(format!("release did not touch {key}")))?;
            Ok(BalanceSnapshot::new(&key, after, receipt.entry.seq))
        };
        let released = ReleaseReceipt {
            source: snapshot(source)?,
            destination: snapshot(destination)?,
            fee: if split.fee.is_zero() {
                None
            } else {
                Some(snapshot(self.fee_account)?)
            },
            split,
        };

        tracing::info!(
            source = %source,
            destination = %destination,
            currency = %currency,
            gross = %split.gross,
            net = %split.net,
            fee = %split.fee,
            seq = receipt.entry.seq,
            "Locked funds released"
        );
        Ok(released)
    }

    // =================================================================
    // Platform pool
    // =================================================================

    /// Record platform funds arriving in the `currency` pool.
    ///
    /// # Errors
    /// `InvalidAmount` for a bad amount.
    pub fn credit_pool(
        &self,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<LiquidityPool> {
        self.liquidity.credit_pool(currency, amount, op)
    }

    /// Pay `account` out of the platform pool.
    ///
    /// The logged liquidity check runs first; the pool debit and the user
    /// credit then go through one conditional commit, so a concurrent
    /// payout that drained the pool in between still fails cleanly.
    ///
    /// # Errors
    /// `LiquidityShortage` if the pool cannot cover `amount`.
    pub fn pay_out_from_pool(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        validate_amount(amount, self.currencies.precision(currency))?;
        self.liquidity.check_and_log(currency, amount, op)?;
        self.pay_out(account, currency, amount, false, op)
    }

    /// Pay `account` out of funds earmarked earlier with
    /// [`LiquidityChecker::reserve`].
    ///
    /// The pool balance, its reservation and the user credit change in one
    /// conditional commit. Unreserved payouts only ever see
    /// `balance − reserved`, so they cannot take the earmarked funds, and
    /// this payout cannot take unreserved ones.
    ///
    /// # Errors
    /// `ReservationShortfall` if less than `amount` is reserved at write time.
    pub fn pay_out_reserved(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        validate_amount(amount, self.currencies.precision(currency))?;
        self.pay_out(account, currency, amount, true, op)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn pay_out(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        from_reservation: bool,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        let reserved = if from_reservation { -amount } else { Decimal::ZERO };
        let key = BalanceKey::new(account, currency.clone());
        let batch = WriteBatch {
            mutations: vec![
                Mutation::pool(currency, -amount, reserved),
                Mutation::balance(account, currency, amount, Decimal::ZERO),
            ],
            audit: self
                .draft(AuditEventType::PoolPayout, account, currency, amount, op)
                .details(json!({
                    "action_type": op.action_type,
                    "from_reservation": from_reservation,
                })),
        };
        let receipt = self.commit(batch, account, currency)?;
        let after = receipt
            .after(&key)
            .ok_or_else(|| LedgerError::Internal(format!("payout did not touch {key}")))?;

        tracing::info!(
            account = %account,
            currency = %currency,
            amount = %amount,
            from_reservation,
            seq = receipt.entry.seq,
            "Paid out from liquidity pool"
        );
        Ok(BalanceSnapshot::new(&key, after, receipt.entry.seq))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        available: Decimal,
        locked: Decimal,
        event: AuditEventType,
        op: &Operation,
    ) -> Result<BalanceSnapshot> {
        validate_amount(amount, self.currencies.precision(currency))?;
        let key = BalanceKey::new(account, currency.clone());
        let batch = WriteBatch {
            mutations: vec![Mutation::balance(account, currency, available, locked)],
            audit: self
                .draft(event, account, currency, amount, op)
                .details(json!({ "action_type": op.action_type })),
        };
        let receipt = self.commit(batch, account, currency)?;
        let after = receipt
            .after(&key)
            .ok_or_else(|| LedgerError::Internal(format!("{event} did not touch {key}")))?;

        tracing::info!(
            account = %account,
            currency = %currency,
            event = %event,
            amount = %amount,
            available = %after.available,
            locked = %after.locked,
            seq = receipt.entry.seq,
            "Balance updated"
        );
        Ok(BalanceSnapshot::new(&key, after, receipt.entry.seq))
    }

    fn draft(
        &self,
        event: AuditEventType,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
        op: &Operation,
    ) -> AuditDraft {
        AuditDraft::new(event, Severity::Info, currency.clone(), amount, op.correlation_id)
            .account(account)
            .reference(op.reference_id.clone())
    }

    /// Commit, escalating a refused write on divergent views.
    fn commit(
        &self,
        batch: WriteBatch,
        account: AccountId,
        currency: &Currency,
    ) -> Result<CommitReceipt> {
        let event = batch.audit.event_type;
        let amount = batch.audit.amount;
        let correlation_id = batch.audit.correlation_id;
        let reference = batch.audit.reference_id.clone();

        match self.store.commit(batch) {
            Ok(receipt) => Ok(receipt),
            Err(err @ LedgerError::IntegrityMismatch { .. }) => {
                tracing::error!(
                    account = %account,
                    currency = %currency,
                    event = %event,
                    error = %err,
                    "Write refused: balance views disagree"
                );
                let mut draft = AuditDraft::new(
                    AuditEventType::WriteRefused,
                    Severity::Critical,
                    currency.clone(),
                    amount,
                    correlation_id,
                )
                .account(account)
                .details(json!({
                    "refused_event": event,
                    "error": err.to_string(),
                }));
                draft.reference_id = reference;
                self.store.append_audit(draft)?;
                Err(err)
            }
            Err(err) => {
                tracing::debug!(
                    account = %account,
                    currency = %currency,
                    event = %event,
                    error = %err,
                    "Balance operation rejected"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openledger_types::{ActionType, BalanceBucket, BalanceView};
    use rust_decimal_macros::dec;

    fn service() -> AtomicBalanceService {
        AtomicBalanceService::in_memory(&LedgerConfig::default()).unwrap()
    }

    fn op(action: ActionType) -> Operation {
        Operation::new(action, "ref-1")
    }

    fn btc() -> Currency {
        Currency::new("BTC")
    }

    #[test]
    fn credit_then_debit() {
        let svc = service();
        let alice = AccountId::new();
        let snap = svc.credit(alice, &btc(), dec!(2), &op(ActionType::Deposit)).unwrap();
        assert_eq!(snap.available, dec!(2));
        assert_eq!(snap.total, dec!(2));
        assert_eq!(snap.audit_seq, 1);

        let snap = svc.debit(alice, &btc(), dec!(0.5), &op(ActionType::Withdrawal)).unwrap();
        assert_eq!(snap.available, dec!(1.5));
        assert_eq!(snap.total, dec!(1.5));
    }

    #[test]
    fn invalid_amount_touches_nothing() {
        let svc = service();
        let alice = AccountId::new();
        for amount in [Decimal::ZERO, dec!(-1), dec!(0.000000001)] {
            let err = svc.credit(alice, &btc(), amount, &op(ActionType::Deposit)).unwrap_err();
            assert_eq!(err.code(), "INVALID_AMOUNT");
        }
        assert!(svc.store().audit_entries().unwrap().is_empty());
        assert!(svc.store().keys().unwrap().is_empty());
    }

    #[test]
    fn overdraw_leaves_record_unchanged() {
        let svc = service();
        let alice = AccountId::new();
        svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();

        let err = svc.debit(alice, &btc(), dec!(1.1), &op(ActionType::Withdrawal)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { needed, available, .. }
                if needed == dec!(1.1) && available == dec!(1)
        ));
        assert_eq!(
            svc.balance(alice, &btc()).unwrap(),
            BalanceRecord::from_parts(dec!(1), Decimal::ZERO)
        );
        assert_eq!(svc.store().audit_entries().unwrap().len(), 1);
    }

    #[test]
    fn lock_and_unlock() {
        let svc = service();
        let alice = AccountId::new();
        svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();

        let snap = svc.lock(alice, &btc(), dec!(0.4), &op(ActionType::EscrowOpen)).unwrap();
        assert_eq!((snap.available, snap.locked, snap.total), (dec!(0.6), dec!(0.4), dec!(1.0)));

        let err = svc.unlock(alice, &btc(), dec!(0.5), &op(ActionType::EscrowCancel)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { bucket: BalanceBucket::Locked, .. }
        ));

        let snap = svc.unlock(alice, &btc(), dec!(0.4), &op(ActionType::EscrowCancel)).unwrap();
        assert_eq!((snap.available, snap.locked), (dec!(1.0), Decimal::ZERO));
    }

    #[test]
    fn release_splits_fee() {
        let svc = service();
        let seller = AccountId::new();
        let buyer = AccountId::new();
        svc.credit(seller, &btc(), dec!(1.0), &op(ActionType::Deposit)).unwrap();
        svc.lock(seller, &btc(), dec!(0.4), &op(ActionType::EscrowOpen)).unwrap();

        let receipt = svc
            .release(seller, &btc(), dec!(0.4), buyer, dec!(1.0), &op(ActionType::EscrowRelease))
            .unwrap();
        assert_eq!(receipt.source.locked, Decimal::ZERO);
        assert_eq!(receipt.source.total, dec!(0.6));
        assert_eq!(receipt.destination.available, dec!(0.396));
        assert_eq!(receipt.fee.as_ref().unwrap().available, dec!(0.004));
        assert_eq!(svc.balance(svc.fee_account(), &btc()).unwrap().available, dec!(0.004));

        // One audit entry with three legs.
        let entry = svc.store().audit_entries().unwrap().pop().unwrap();
        assert_eq!(entry.event_type, AuditEventType::Release);
        assert_eq!(entry.legs.len(), 3);
        assert_eq!(receipt.source.audit_seq, entry.seq);
    }

    #[test]
    fn fee_free_release_skips_fee_leg() {
        let svc = service();
        let seller = AccountId::new();
        let buyer = AccountId::new();
        svc.credit(seller, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();
        svc.lock(seller, &btc(), dec!(1), &op(ActionType::EscrowOpen)).unwrap();
        let receipt = svc
            .release(seller, &btc(), dec!(1), buyer, Decimal::ZERO, &op(ActionType::EscrowRelease))
            .unwrap();
        assert!(receipt.fee.is_none());
        assert_eq!(receipt.destination.available, dec!(1));
    }

    #[test]
    fn release_without_locked_funds_writes_nothing() {
        let svc = service();
        let seller = AccountId::new();
        let buyer = AccountId::new();
        svc.credit(seller, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();
        let err = svc
            .release(seller, &btc(), dec!(0.5), buyer, dec!(1), &op(ActionType::EscrowRelease))
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(svc.balance(buyer, &btc()).unwrap().is_zero());
        assert!(svc.balance(svc.fee_account(), &btc()).unwrap().is_zero());
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let svc = service();
        let alice = AccountId::new();
        let n = 16u32;
        let amount = dec!(0.25);
        svc.credit(alice, &btc(), amount * Decimal::from(n - 1), &op(ActionType::Deposit))
            .unwrap();

        let results: Vec<Result<BalanceSnapshot>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..n)
                .map(|_| s.spawn(|| svc.debit(alice, &btc(), amount, &op(ActionType::Withdrawal))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
            .count();
        assert_eq!(ok, (n - 1) as usize);
        assert_eq!(insufficient, 1);
        assert_eq!(svc.balance(alice, &btc()).unwrap().available, Decimal::ZERO);
    }

    #[test]
    fn divergent_views_refuse_and_escalate() {
        let store = Arc::new(InMemoryLedgerStore::new(BalanceView::ALL.to_vec()).unwrap());
        let svc = AtomicBalanceService::new(store.clone(), &LedgerConfig::default());
        let alice = AccountId::new();
        svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();
        store.tamper_view(
            BalanceView::Escrow,
            &BalanceKey::new(alice, btc()),
            BalanceRecord::from_parts(dec!(5), Decimal::ZERO),
        );

        let err = svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap_err();
        assert_eq!(err.code(), "INTEGRITY_MISMATCH");
        assert!(!err.is_retryable());
        let last = svc.store().audit_entries().unwrap().pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::WriteRefused);
        assert_eq!(last.severity, Severity::Critical);
    }

    #[test]
    fn every_view_agrees_after_writes() {
        let svc = service();
        let alice = AccountId::new();
        svc.credit(alice, &btc(), dec!(3), &op(ActionType::Deposit)).unwrap();
        svc.lock(alice, &btc(), dec!(1), &op(ActionType::EscrowOpen)).unwrap();
        let key = BalanceKey::new(alice, btc());
        let primary = svc.store().read(&key).unwrap();
        for view in BalanceView::ALL {
            assert_eq!(svc.store().read_view(view, &key).unwrap(), Some(primary));
        }
    }

    #[test]
    fn payout_is_gated_by_pool() {
        let svc = service();
        let alice = AccountId::new();
        let usdt = Currency::new("USDT");
        svc.credit_pool(&usdt, dec!(100), &op(ActionType::Deposit)).unwrap();

        let snap = svc.pay_out_from_pool(alice, &usdt, dec!(60), &op(ActionType::Payout)).unwrap();
        assert_eq!(snap.available, dec!(60));
        assert_eq!(svc.liquidity().pool(&usdt).unwrap().balance, dec!(40));

        let err = svc
            .pay_out_from_pool(alice, &usdt, dec!(40.5), &op(ActionType::Payout))
            .unwrap_err();
        assert_eq!(err.code(), "LIQUIDITY_SHORTAGE");
        assert_eq!(svc.balance(alice, &usdt).unwrap().available, dec!(60));
        assert_eq!(svc.liquidity().pool(&usdt).unwrap().balance, dec!(40));
    }

    #[test]
    fn credit_past_decimal_range_is_rejected() {
        let svc = service();
        let alice = AccountId::new();
        svc.credit(alice, &btc(), Decimal::MAX, &op(ActionType::Deposit)).unwrap();

        let err = svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(svc.balance(alice, &btc()).unwrap().available, Decimal::MAX);
        assert_eq!(svc.store().audit_entries().unwrap().len(), 1);

        // the store is still usable afterwards
        let snap = svc.debit(alice, &btc(), dec!(1), &op(ActionType::Withdrawal)).unwrap();
        assert_eq!(snap.available, Decimal::MAX - dec!(1));
    }

    #[test]
    fn reserved_payout_consumes_reservation() {
        let svc = service();
        let alice = AccountId::new();
        let usdt = Currency::new("USDT");
        svc.credit_pool(&usdt, dec!(100), &op(ActionType::Deposit)).unwrap();
        svc.liquidity().reserve(&usdt, dec!(60), &op(ActionType::Payout)).unwrap();

        let snap = svc.pay_out_reserved(alice, &usdt, dec!(60), &op(ActionType::Payout)).unwrap();
        assert_eq!(snap.available, dec!(60));
        let pool = svc.liquidity().pool(&usdt).unwrap();
        assert_eq!((pool.balance, pool.reserved), (dec!(40), Decimal::ZERO));

        let last = svc.store().audit_entries().unwrap().pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::PoolPayout);
        assert_eq!(last.details["from_reservation"], true);

        // nothing reserved any more
        let err = svc
            .pay_out_reserved(alice, &usdt, dec!(1), &op(ActionType::Payout))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReservationShortfall { .. }));
        assert_eq!(err.code(), "LIQUIDITY_SHORTAGE");
        assert_eq!(svc.balance(alice, &usdt).unwrap().available, dec!(60));
    }

    #[test]
    fn reserved_payout_survives_racing_payouts() {
        let svc = service();
        let usdt = Currency::new("USDT");
        svc.credit_pool(&usdt, dec!(100), &op(ActionType::Deposit)).unwrap();
        svc.liquidity().reserve(&usdt, dec!(60), &op(ActionType::Payout)).unwrap();
        let reserved_for = AccountId::new();
        let unreserved_payout =
            || svc.pay_out_from_pool(AccountId::new(), &usdt, dec!(20), &op(ActionType::Payout));

        let (reserved, unreserved) = std::thread::scope(|s| {
            let racers: Vec<_> = (0..8).map(|_| s.spawn(unreserved_payout)).collect();
            let reserved = s.spawn(|| {
                svc.pay_out_reserved(reserved_for, &usdt, dec!(60), &op(ActionType::Payout))
            });
            (
                reserved.join().unwrap(),
                racers.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>(),
            )
        });

        assert_eq!(reserved.unwrap().available, dec!(60));
        assert_eq!(unreserved.iter().filter(|r| r.is_ok()).count(), 2);
        assert!(unreserved
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == "LIQUIDITY_SHORTAGE"));
        let pool = svc.liquidity().pool(&usdt).unwrap();
        assert_eq!((pool.balance, pool.reserved), (Decimal::ZERO, Decimal::ZERO));
    }

    #[test]
    fn audit_chain_stays_valid() {
        let svc = service();
        let alice = AccountId::new();
        svc.credit(alice, &btc(), dec!(1), &op(ActionType::Deposit)).unwrap();
        let _ = svc.debit(alice, &btc(), dec!(5), &op(ActionType::Withdrawal));
        svc.lock(alice, &btc(), dec!(0.5), &op(ActionType::EscrowOpen)).unwrap();
        assert!(svc.store().verify_audit_chain().is_ok());
        assert_eq!(svc.store().audit_for(alice, &btc()).unwrap().len(), 2);
    }
}
