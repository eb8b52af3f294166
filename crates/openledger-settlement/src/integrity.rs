//! Integrity / Reconciliation Service.
//!
//! Polices the redundant balance views. `verify` compares every view of one
//! balance against the primary view within a tolerance and records the
//! outcome in the audit trail; `sweep` runs `verify` over every known
//! balance; `reconcile` is the privileged manual repair. Nothing here ever
//! repairs a mismatch on its own.

use std::sync::Arc;

use openledger_balance::{AtomicBalanceService, LedgerStore, ViewRepair};
use openledger_types::{
    AccountId, AuditDraft, AuditEventType, BalanceKey, BalanceRecord, BalanceView, CorrelationId,
    Currency, CurrencyRegistry, LedgerError, Result, Severity,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One view's value as seen by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewValue {
    pub view: BalanceView,
    /// `false` if the view holds no record (read as zero).
    pub present: bool,
    pub record: BalanceRecord,
    /// Largest field difference against the baseline view.
    pub difference: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account: AccountId,
    pub currency: Currency,
    pub baseline: BalanceView,
    pub tolerance: Decimal,
    pub views: Vec<ViewValue>,
    /// Sequence number of the INFO entry recording this check.
    pub audit_seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub mismatched: Vec<BalanceKey>,
}

impl SweepReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.mismatched.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub account: AccountId,
    pub currency: Currency,
    pub source: BalanceView,
    pub repairs: Vec<ViewRepair>,
    pub audit_seq: u64,
}

pub struct IntegrityService {
    store: Arc<dyn LedgerStore>,
    currencies: CurrencyRegistry,
}

impl IntegrityService {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, currencies: CurrencyRegistry) -> Self {
        Self { store, currencies }
    }

    /// Service over the same store and currencies as `balances`.
    #[must_use]
    pub fn for_service(balances: &AtomicBalanceService) -> Self {
        Self::new(Arc::clone(balances.store()), balances.currencies().clone())
    }

    /// Compare every view of `(account, currency)` against the primary view.
    ///
    /// # Errors
    /// [`LedgerError::IntegrityMismatch`] if any view differs by more than
    /// `tolerance`, after a CRITICAL audit entry with every view's value and
    /// difference has been written. Not retryable.
    pub fn verify(
        &self,
        account: AccountId,
        currency: &Currency,
        tolerance: Decimal,
    ) -> Result<IntegrityReport> {
        if tolerance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: tolerance,
                reason: "tolerance must not be negative".into(),
            });
        }
        let key = BalanceKey::new(account, currency.clone());
        let read = self.store.read_all_views(&key)?;
        let (baseline, baseline_record) = read
            .first()
            .map(|(view, record)| (*view, record.unwrap_or_default()))
            .ok_or_else(|| LedgerError::Configuration("store has no views".into()))?;

        let views: Vec<ViewValue> = read
            .iter()
            .map(|(view, record)| {
                let value = record.unwrap_or_default();
                ViewValue {
                    view: *view,
                    present: record.is_some(),
                    record: value,
                    difference: value.max_abs_diff(&baseline_record),
                }
            })
            .collect();
        let diverged: Vec<&ViewValue> = views.iter().filter(|v| v.difference > tolerance).collect();

        let details = json!({
            "baseline": baseline,
            "tolerance": tolerance,
            "views": views,
        });

        if diverged.is_empty() {
            let entry = self.store.append_audit(
                AuditDraft::new(
                    AuditEventType::IntegrityVerified,
                    Severity::Info,
                    currency.clone(),
                    baseline_record.total,
                    CorrelationId::new(),
                )
                .account(account)
                .details(details),
            )?;
            tracing::debug!(
                account = %account,
                currency = %currency,
                views = views.len(),
                "Balance views agree"
            );
            return Ok(IntegrityReport {
                account,
                currency: currency.clone(),
                baseline,
                tolerance,
                views,
                audit_seq: entry.seq,
            });
        }

        let reason = diverged
            .iter()
            .map(|v| format!("{} differs from {baseline} by {}", v.view, v.difference))
            .collect::<Vec<_>>()
            .join("; ");
        self.store.append_audit(
            AuditDraft::new(
                AuditEventType::IntegrityMismatch,
                Severity::Critical,
                currency.clone(),
                baseline_record.total,
                CorrelationId::new(),
            )
            .account(account)
            .details(details),
        )?;
        tracing::error!(
            account = %account,
            currency = %currency,
            tolerance = %tolerance,
            diverged = diverged.len(),
            reason = %reason,
            "Balance views disagree; manual reconciliation required"
        );
        Err(LedgerError::IntegrityMismatch {
            account,
            currency: currency.clone(),
            reason,
        })
    }

    /// [`verify`](Self::verify) with the currency's configured tolerance.
    ///
    /// # Errors
    /// As [`verify`](Self::verify).
    pub fn verify_default(
        &self,
        account: AccountId,
        currency: &Currency,
    ) -> Result<IntegrityReport> {
        self.verify(account, currency, self.currencies.tolerance(currency))
    }

    /// Verify every known balance. Mismatches are collected, not raised.
    ///
    /// # Errors
    /// Store failures only.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for key in self.store.keys()? {
            report.checked += 1;
            match self.verify_default(key.account, &key.currency) {
                Ok(_) => report.healthy += 1,
                Err(LedgerError::IntegrityMismatch { .. }) => report.mismatched.push(key),
                Err(err) => return Err(err),
            }
        }
        tracing::info!(
            checked = report.checked,
            healthy = report.healthy,
            mismatched = report.mismatched.len(),
            "Integrity sweep complete"
        );
        Ok(report)
    }

    /// Privileged: overwrite every view with `source`'s record.
    ///
    /// Writes a WARNING entry with each view's before/after state. Never
    /// called by ordinary request traffic.
    ///
    /// # Errors
    /// `UnknownView` if the store does not keep `source`;
    /// `InvariantViolation` if `source` itself holds a broken record.
    pub fn reconcile(
        &self,
        account: AccountId,
        currency: &Currency,
        source: BalanceView,
    ) -> Result<ReconcileReport> {
        let key = BalanceKey::new(account, currency.clone());
        let draft = AuditDraft::new(
            AuditEventType::Reconciliation,
            Severity::Warning,
            currency.clone(),
            Decimal::ZERO,
            CorrelationId::new(),
        )
        .account(account);
        let (repairs, entry) = self.store.reconcile_views(&key, source, draft)?;

        let changed = repairs
            .iter()
            .filter(|r| r.before != Some(r.after))
            .count();
        tracing::warn!(
            account = %account,
            currency = %currency,
            source = %source,
            changed,
            seq = entry.seq,
            "Balance views reconciled"
        );
        Ok(ReconcileReport {
            account,
            currency: currency.clone(),
            source,
            repairs,
            audit_seq: entry.seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openledger_balance::InMemoryLedgerStore;
    use openledger_types::{ActionType, LedgerConfig, Operation};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        balances: AtomicBalanceService,
        integrity: IntegrityService,
    }

    fn fixture() -> Fixture {
        let config = LedgerConfig::default();
        let store = Arc::new(InMemoryLedgerStore::from_config(&config).unwrap());
        let balances = AtomicBalanceService::new(store.clone(), &config);
        let integrity = IntegrityService::for_service(&balances);
        Fixture {
            store,
            balances,
            integrity,
        }
    }

    fn deposit(f: &Fixture, account: AccountId, currency: &Currency, amount: Decimal) {
        f.balances
            .credit(account, currency, amount, &Operation::new(ActionType::Deposit, "dep"))
            .unwrap();
    }

    #[test]
    fn agreeing_views_are_healthy() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        deposit(&f, alice, &btc, dec!(1));

        let report = f.integrity.verify_default(alice, &btc).unwrap();
        assert_eq!(report.baseline, BalanceView::Wallet);
        assert_eq!(report.views.len(), 4);
        assert!(report.views.iter().all(|v| v.present && v.difference.is_zero()));

        let entry = f.store.audit_entries().unwrap().pop().unwrap();
        assert_eq!(entry.event_type, AuditEventType::IntegrityVerified);
        assert_eq!(entry.severity, Severity::Info);
        assert_eq!(entry.seq, report.audit_seq);
    }

    #[test]
    fn unseen_balance_is_healthy_zero() {
        let f = fixture();
        let report = f
            .integrity
            .verify(AccountId::new(), &Currency::new("ETH"), Decimal::ZERO)
            .unwrap();
        assert!(report.views.iter().all(|v| !v.present && v.record.is_zero()));
    }

    #[test]
    fn drift_beyond_tolerance_is_critical() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        deposit(&f, alice, &btc, dec!(1));
        f.store.tamper_view(
            BalanceView::Trading,
            &BalanceKey::new(alice, btc.clone()),
            BalanceRecord::from_parts(dec!(1.1), Decimal::ZERO),
        );

        let err = f.integrity.verify(alice, &btc, dec!(0.00000001)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::IntegrityMismatch { ref reason, .. } if reason.contains("TRADING")
        ));
        assert!(!err.is_retryable());

        let entry = f.store.audit_entries().unwrap().pop().unwrap();
        assert_eq!(entry.event_type, AuditEventType::IntegrityMismatch);
        assert_eq!(entry.severity, Severity::Critical);
        assert_eq!(entry.details["views"].as_array().unwrap().len(), 4);

        // Within a wide enough tolerance the same drift passes.
        assert!(f.integrity.verify(alice, &btc, dec!(0.2)).is_ok());
    }

    #[test]
    fn sweep_and_writes_agree_on_tolerance() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        let key = BalanceKey::new(alice, btc.clone());
        let op = Operation::new(ActionType::Deposit, "dep-2");
        deposit(&f, alice, &btc, dec!(1));

        // Below the BTC tolerance: reported healthy, and writable.
        f.store.tamper_view(
            BalanceView::Trading,
            &key,
            BalanceRecord::from_parts(dec!(1.000000001), Decimal::ZERO),
        );
        assert!(f.integrity.sweep().unwrap().is_healthy());
        f.balances.credit(alice, &btc, dec!(1), &op).unwrap();
        let report = f.integrity.verify_default(alice, &btc).unwrap();
        assert!(report.views.iter().all(|v| v.difference.is_zero()));

        // Above it: reported mismatched, and quarantined.
        f.store.tamper_view(
            BalanceView::Trading,
            &key,
            BalanceRecord::from_parts(dec!(2.00000002), Decimal::ZERO),
        );
        assert_eq!(f.integrity.sweep().unwrap().mismatched, vec![key]);
        let err = f.balances.credit(alice, &btc, dec!(1), &op).unwrap_err();
        assert_eq!(err.code(), "INTEGRITY_MISMATCH");
    }

    #[test]
    fn missing_view_record_counts_as_zero() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        f.store.tamper_view(
            BalanceView::Admin,
            &BalanceKey::new(alice, btc.clone()),
            BalanceRecord::from_parts(dec!(0.5), Decimal::ZERO),
        );
        let err = f.integrity.verify_default(alice, &btc).unwrap_err();
        assert!(matches!(err, LedgerError::IntegrityMismatch { .. }));
    }

    #[test]
    fn sweep_collects_mismatches() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        let bob = AccountId::new();
        deposit(&f, alice, &btc, dec!(1));
        deposit(&f, bob, &btc, dec!(2));
        f.store.tamper_view(
            BalanceView::Escrow,
            &BalanceKey::new(bob, btc.clone()),
            BalanceRecord::from_parts(dec!(3), Decimal::ZERO),
        );

        let report = f.integrity.sweep().unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.mismatched, vec![BalanceKey::new(bob, btc)]);
        assert!(!report.is_healthy());
    }

    #[test]
    fn reconcile_restores_agreement() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        deposit(&f, alice, &btc, dec!(1));
        let key = BalanceKey::new(alice, btc.clone());
        f.store.tamper_view(
            BalanceView::Trading,
            &key,
            BalanceRecord::from_parts(dec!(7), Decimal::ZERO),
        );

        // Ordinary traffic is quarantined until repaired.
        assert!(f
            .balances
            .credit(alice, &btc, dec!(1), &Operation::new(ActionType::Deposit, "dep-2"))
            .is_err());

        let report = f.integrity.reconcile(alice, &btc, BalanceView::Wallet).unwrap();
        assert_eq!(report.repairs.len(), 4);
        let entry = f.store.audit_entries().unwrap().pop().unwrap();
        assert_eq!(entry.event_type, AuditEventType::Reconciliation);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.seq, report.audit_seq);

        assert!(f.integrity.verify_default(alice, &btc).is_ok());
        assert!(f
            .balances
            .credit(alice, &btc, dec!(1), &Operation::new(ActionType::Deposit, "dep-2"))
            .is_ok());
        assert_eq!(f.balances.balance(alice, &btc).unwrap().available, dec!(2));
    }

    #[test]
    fn reconcile_from_drifted_view_adopts_it() {
        let f = fixture();
        let btc = Currency::new("BTC");
        let alice = AccountId::new();
        deposit(&f, alice, &btc, dec!(1));
        f.store.tamper_view(
            BalanceView::Admin,
            &BalanceKey::new(alice, btc.clone()),
            BalanceRecord::from_parts(dec!(0.9), dec!(0.1)),
        );
        f.integrity.reconcile(alice, &btc, BalanceView::Admin).unwrap();
        let record = f.balances.balance(alice, &btc).unwrap();
        assert_eq!((record.available, record.locked), (dec!(0.9), dec!(0.1)));
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.integrity.verify(AccountId::new(), &Currency::new("BTC"), dec!(-1)),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}
