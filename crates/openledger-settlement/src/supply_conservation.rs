//! Supply conservation invariant checker.
//!
//! Money only enters or leaves user balances through explicit, audited
//! operations. Replaying the audit trail therefore predicts the total held
//! in every currency:
//! ```text
//! ∀ currency: Σ(available + locked) == Σ(credits) + Σ(pool payouts) - Σ(debits)
//! ∀ currency: pool.balance           == Σ(pool credits) - Σ(pool payouts)
//! ```
//! Lock, unlock and release only move funds between balances and leave
//! both sides unchanged.

use std::collections::{BTreeSet, HashMap};

use openledger_balance::LedgerStore;
use openledger_types::{AuditEntry, AuditEventType, Currency, LedgerError, Result};
use rust_decimal::Decimal;

/// Per-currency inflow and outflow totals, accumulated from audit entries.
#[derive(Debug, Clone, Default)]
pub struct SupplyConservation {
    /// Funds credited into user balances (deposits and pool payouts).
    deposits: HashMap<Currency, Decimal>,
    /// Funds debited out of user balances.
    withdrawals: HashMap<Currency, Decimal>,
    pool_credits: HashMap<Currency, Decimal>,
    pool_payouts: HashMap<Currency, Decimal>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay an audit trail from the beginning.
    #[must_use]
    pub fn from_audit(entries: &[AuditEntry]) -> Self {
        let mut sc = Self::new();
        for entry in entries {
            sc.record(entry);
        }
        sc
    }

    /// Account for one audit entry. Entries that move no money are ignored.
    pub fn record(&mut self, entry: &AuditEntry) {
        match entry.event_type {
            AuditEventType::Credit => self.record_deposit(&entry.currency, entry.amount),
            AuditEventType::Debit => self.record_withdrawal(&entry.currency, entry.amount),
            AuditEventType::PoolCredit => {
                add(&mut self.pool_credits, &entry.currency, entry.amount);
            }
            AuditEventType::PoolPayout => {
                add(&mut self.pool_payouts, &entry.currency, entry.amount);
                self.record_deposit(&entry.currency, entry.amount);
            }
            _ => {}
        }
    }

    pub fn record_deposit(&mut self, currency: &Currency, amount: Decimal) {
        add(&mut self.deposits, currency, amount);
    }

    pub fn record_withdrawal(&mut self, currency: &Currency, amount: Decimal) {
        add(&mut self.withdrawals, currency, amount);
    }

    /// Expected sum of user balances: deposits - withdrawals.
    #[must_use]
    pub fn expected_supply(&self, currency: &Currency) -> Decimal {
        self.total_deposits(currency) - self.total_withdrawals(currency)
    }

    /// Expected pool balance: pool credits - pool payouts.
    #[must_use]
    pub fn expected_pool(&self, currency: &Currency) -> Decimal {
        get(&self.pool_credits, currency) - get(&self.pool_payouts, currency)
    }

    /// Compare an observed supply against the replayed expectation.
    ///
    /// # Errors
    /// Returns [`LedgerError::SupplyInvariantViolation`] if actual ≠ expected.
    pub fn verify(&self, currency: &Currency, actual_supply: Decimal) -> Result<()> {
        let expected = self.expected_supply(currency);
        if actual_supply != expected {
            return Err(LedgerError::SupplyInvariantViolation {
                reason: format!(
                    "{currency}: actual supply {actual_supply} != expected {expected} \
                     (deposits={}, withdrawals={})",
                    self.total_deposits(currency),
                    self.total_withdrawals(currency),
                ),
            });
        }
        Ok(())
    }

    /// Check user supply and pool balance of `currency` in `store`.
    ///
    /// # Errors
    /// `SupplyInvariantViolation` on any disagreement; store failures.
    pub fn verify_store(&self, store: &dyn LedgerStore, currency: &Currency) -> Result<()> {
        let mut actual = Decimal::ZERO;
        for key in store.keys()?.iter().filter(|k| &k.currency == currency) {
            actual = actual.checked_add(store.read(key)?.total).ok_or_else(|| {
                LedgerError::SupplyInvariantViolation {
                    reason: format!("{currency}: total supply exceeds the representable range"),
                }
            })?;
        }
        self.verify(currency, actual)?;

        let pool = store.pool(currency)?.balance;
        let expected_pool = self.expected_pool(currency);
        if pool != expected_pool {
            return Err(LedgerError::SupplyInvariantViolation {
                reason: format!("{currency}: pool balance {pool} != expected {expected_pool}"),
            });
        }
        Ok(())
    }

    /// Replay `store`'s audit trail and check every currency it mentions.
    ///
    /// # Errors
    /// As [`verify_store`](Self::verify_store), for the first failing currency.
    pub fn check_store(store: &dyn LedgerStore) -> Result<Self> {
        let entries = store.audit_entries()?;
        let sc = Self::from_audit(&entries);
        for currency in sc.tracked_currencies() {
            sc.verify_store(store, &currency)?;
        }
        tracing::debug!(
            entries = entries.len(),
            currencies = sc.tracked_currencies().len(),
            "Supply conservation verified"
        );
        Ok(sc)
    }

    /// Every currency with recorded flows, sorted.
    #[must_use]
    pub fn tracked_currencies(&self) -> Vec<Currency> {
        let set: BTreeSet<Currency> = self
            .deposits
            .keys()
            .chain(self.withdrawals.keys())
            .chain(self.pool_credits.keys())
            .chain(self.pool_payouts.keys())
            .cloned()
            .collect();
        set.into_iter().collect()
    }

    #[must_use]
    pub fn total_deposits(&self, currency: &Currency) -> Decimal {
        get(&self.deposits, currency)
    }

    #[must_use]
    pub fn total_withdrawals(&self, currency: &Currency) -> Decimal {
        get(&self.withdrawals, currency)
    }
}

fn add(map: &mut HashMap<Currency, Decimal>, currency: &Currency, amount: Decimal) {
    let total = map.entry(currency.clone()).or_insert(Decimal::ZERO);
    *total = total.saturating_add(amount);
}

fn get(map: &HashMap<Currency, Decimal>, currency: &Currency) -> Decimal {
    map.get(currency).copied().unwrap_or(Decimal::ZERO)
}
