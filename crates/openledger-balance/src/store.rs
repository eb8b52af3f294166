//! Ledger storage: redundant balance views, liquidity pools and the audit
//! trail behind one conditional-commit seam.
//!
//! Every mutation is expressed as a [`WriteBatch`] of signed deltas plus the
//! audit entry describing it. The store checks each delta's precondition
//! (no bucket may go negative) against the value it holds *at write time*
//! and applies the whole batch to every view, plus the audit entry, as one
//! unit. A failed precondition writes nothing.
//!
//! A batch touching a key whose views already disagree by more than the
//! currency's tolerance is refused with [`LedgerError::IntegrityMismatch`]:
//! ordinary traffic must never paper over divergence by rewriting every
//! view from one of them. The rule is the one the integrity check applies,
//! so a key it reports healthy is always writable.

use std::collections::{BTreeMap, HashMap};

use openledger_types::{
    AccountId, AuditDraft, AuditEntry, BalanceBucket, BalanceKey, BalanceLeg, BalanceRecord,
    BalanceView, Currency, CurrencyRegistry, LedgerConfig, LedgerError, LiquidityPool, PoolLeg,
    Result,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;

use crate::audit_trail::AuditTrail;

/// One signed change inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Add `available` and `locked` (either may be negative) to a balance.
    Balance {
        key: BalanceKey,
        available: Decimal,
        locked: Decimal,
    },
    /// Add `balance` and `reserved` to a liquidity pool.
    Pool {
        currency: Currency,
        balance: Decimal,
        reserved: Decimal,
    },
}

impl Mutation {
    #[must_use]
    pub fn balance(
        account: AccountId,
        currency: &Currency,
        available: Decimal,
        locked: Decimal,
    ) -> Self {
        Self::Balance {
            key: BalanceKey::new(account, currency.clone()),
            available,
            locked,
        }
    }

    #[must_use]
    pub fn pool(currency: &Currency, balance: Decimal, reserved: Decimal) -> Self {
        Self::Pool {
            currency: currency.clone(),
            balance,
            reserved,
        }
    }
}

/// Mutations and the audit entry that records them.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub mutations: Vec<Mutation>,
    /// Legs and pool state are filled in by the store.
    pub audit: AuditDraft,
}

/// What a successful commit wrote.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub legs: Vec<BalanceLeg>,
    pub pool: Option<PoolLeg>,
    pub entry: AuditEntry,
}

impl CommitReceipt {
    /// The resulting record for a key touched by this commit.
    #[must_use]
    pub fn after(&self, key: &BalanceKey) -> Option<BalanceRecord> {
        self.legs
            .iter()
            .find(|l| l.account == key.account && l.currency == key.currency)
            .map(|l| l.after)
    }
}

/// Per-view state before a reconciliation overwrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRepair {
    pub view: BalanceView,
    pub before: Option<BalanceRecord>,
    pub after: BalanceRecord,
}

/// The authoritative data store behind the ledger.
///
/// Implementations must make [`commit`](Self::commit) and
/// [`reconcile_views`](Self::reconcile_views) atomic with respect to every
/// other call.
pub trait LedgerStore: Send + Sync {
    /// Views maintained, primary first.
    fn views(&self) -> &[BalanceView];

    /// Read one view of a record. `None` means never written.
    fn read_view(&self, view: BalanceView, key: &BalanceKey) -> Result<Option<BalanceRecord>>;

    /// Every view of one record, read under a single snapshot, in
    /// [`views`](Self::views) order.
    fn read_all_views(
        &self,
        key: &BalanceKey,
    ) -> Result<Vec<(BalanceView, Option<BalanceRecord>)>>;

    /// Every key present in any view.
    fn keys(&self) -> Result<Vec<BalanceKey>>;

    /// Conditionally apply a batch across all views and append its audit entry.
    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    /// Copy `source`'s record over every other view and append `audit`
    /// with the per-view before/after values.
    fn reconcile_views(
        &self,
        key: &BalanceKey,
        source: BalanceView,
        audit: AuditDraft,
    ) -> Result<(Vec<ViewRepair>, AuditEntry)>;

    /// Current state of a pool. Unknown pools are empty.
    fn pool(&self, currency: &Currency) -> Result<LiquidityPool>;

    /// Append an audit entry that does not accompany a balance write.
    fn append_audit(&self, draft: AuditDraft) -> Result<AuditEntry>;

    /// Snapshot of the whole audit trail.
    fn audit_entries(&self) -> Result<Vec<AuditEntry>>;

    /// Entries touching one balance.
    fn audit_for(&self, account: AccountId, currency: &Currency) -> Result<Vec<AuditEntry>>;

    /// Verify the audit hash chain.
    fn verify_audit_chain(&self) -> Result<()>;

    /// Primary-view record, zero if never written.
    fn read(&self, key: &BalanceKey) -> Result<BalanceRecord> {
        let primary = self
            .views()
            .first()
            .copied()
            .ok_or_else(|| LedgerError::Configuration("store has no views".into()))?;
        Ok(self.read_view(primary, key)?.unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    views: BTreeMap<BalanceView, HashMap<BalanceKey, BalanceRecord>>,
    pools: HashMap<Currency, LiquidityPool>,
    audit: AuditTrail,
}

/// Single-process store. One mutex serializes all commits, which gives
/// every conditional update the same guarantee a database row lock would.
pub struct InMemoryLedgerStore {
    view_order: Vec<BalanceView>,
    currencies: CurrencyRegistry,
    state: Mutex<StoreState>,
}

impl InMemoryLedgerStore {
    /// Create a store maintaining `views` (primary first), with the default
    /// currency tolerances.
    ///
    /// # Errors
    /// Returns `Configuration` if `views` is empty.
    pub fn new(views: Vec<BalanceView>) -> Result<Self> {
        if views.is_empty() {
            return Err(LedgerError::Configuration("at least one balance view is required".into()));
        }
        let state = StoreState {
            views: views.iter().map(|v| (*v, HashMap::new())).collect(),
            ..StoreState::default()
        };
        Ok(Self {
            view_order: views,
            currencies: CurrencyRegistry::default(),
            state: Mutex::new(state),
        })
    }

    /// # Errors
    /// Returns `Configuration` if the config has no views.
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(config.views.clone())?.with_currencies(config.registry()))
    }

    /// Use `currencies` for the per-currency view tolerance.
    #[must_use]
    pub fn with_currencies(mut self, currencies: CurrencyRegistry) -> Self {
        self.currencies = currencies;
        self
    }

    /// Overwrite a single view behind the ledger's back, simulating the
    /// independently-issued writes that let views drift.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn tamper_view(&self, view: BalanceView, key: &BalanceKey, record: BalanceRecord) {
        let mut state = self.state.lock();
        if let Some(table) = state.views.get_mut(&view) {
            table.insert(key.clone(), record);
        }
    }

    /// Load the primary record for `key`, refusing if any view differs from
    /// it by more than the currency tolerance.
    fn load_consistent(&self, state: &StoreState, key: &BalanceKey) -> Result<BalanceRecord> {
        let tolerance = self.currencies.tolerance(&key.currency);
        let mut baseline: Option<(BalanceView, BalanceRecord)> = None;
        for view in &self.view_order {
            let record = state
                .views
                .get(view)
                .and_then(|t| t.get(key))
                .copied()
                .unwrap_or_default();
            match baseline {
                None => baseline = Some((*view, record)),
                Some((base_view, base)) if record.max_abs_diff(&base) > tolerance => {
                    return Err(LedgerError::IntegrityMismatch {
                        account: key.account,
                        currency: key.currency.clone(),
                        reason: format!(
                            "write refused: {view} ({}/{}) differs from {base_view} ({}/{}) \
                             by more than {tolerance}",
                            record.available, record.locked, base.available, base.locked
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(baseline.map(|(_, r)| r).unwrap_or_default())
    }
}

fn apply_balance_delta(
    key: &BalanceKey,
    current: BalanceRecord,
    available: Decimal,
    locked: Decimal,
) -> Result<BalanceRecord> {
    let overflow = |amount: Decimal| LedgerError::InvalidAmount {
        amount,
        reason: format!("{key} balance would exceed the representable range"),
    };
    let next_available = current
        .available
        .checked_add(available)
        .ok_or_else(|| overflow(available))?;
    let next_locked = current
        .locked
        .checked_add(locked)
        .ok_or_else(|| overflow(locked))?;
    let next = BalanceRecord::checked_from_parts(next_available, next_locked)
        .ok_or_else(|| overflow(available.max(locked)))?;
    if next.available < Decimal::ZERO {
        return Err(LedgerError::InsufficientBalance {
            account: key.account,
            currency: key.currency.clone(),
            bucket: BalanceBucket::Available,
            needed: -available,
            available: current.available,
        });
    }
    if next.locked < Decimal::ZERO {
        return Err(LedgerError::InsufficientBalance {
            account: key.account,
            currency: key.currency.clone(),
            bucket: BalanceBucket::Locked,
            needed: -locked,
            available: current.locked,
        });
    }
    next.check_invariants()?;
    Ok(next)
}

fn apply_pool_delta(
    current: &LiquidityPool,
    balance: Decimal,
    reserved: Decimal,
) -> Result<LiquidityPool> {
    let overflow = |amount: Decimal| LedgerError::InvalidAmount {
        amount,
        reason: format!("pool {} would exceed the representable range", current.currency),
    };
    let next = LiquidityPool {
        currency: current.currency.clone(),
        balance: current
            .balance
            .checked_add(balance)
            .ok_or_else(|| overflow(balance))?,
        reserved: current
            .reserved
            .checked_add(reserved)
            .ok_or_else(|| overflow(reserved))?,
    };
    if next.reserved < Decimal::ZERO {
        return Err(LedgerError::ReservationShortfall {
            currency: current.currency.clone(),
            requested: -reserved,
            reserved: current.reserved,
        });
    }
    if next.available() < Decimal::ZERO {
        return Err(LedgerError::LiquidityShortage {
            currency: current.currency.clone(),
            requested: reserved - balance,
            available: current.available(),
        });
    }
    Ok(next)
}

impl LedgerStore for InMemoryLedgerStore {
    fn views(&self) -> &[BalanceView] {
        &self.view_order
    }

    fn read_view(&self, view: BalanceView, key: &BalanceKey) -> Result<Option<BalanceRecord>> {
        let state = self.state.lock();
        let table = state.views.get(&view).ok_or(LedgerError::UnknownView(view))?;
        Ok(table.get(key).copied())
    }

    fn read_all_views(
        &self,
        key: &BalanceKey,
    ) -> Result<Vec<(BalanceView, Option<BalanceRecord>)>> {
        let state = self.state.lock();
        self.view_order
            .iter()
            .map(|view| {
                let table = state.views.get(view).ok_or(LedgerError::UnknownView(*view))?;
                Ok((*view, table.get(key).copied()))
            })
            .collect()
    }

    fn keys(&self) -> Result<Vec<BalanceKey>> {
        let state = self.state.lock();
        let mut keys: Vec<BalanceKey> = state
            .views
            .values()
            .flat_map(|t| t.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut state = self.state.lock();

        // Stage every change against a working copy; nothing touches
        // `state` until all preconditions hold.
        let mut legs: Vec<BalanceLeg> = Vec::new();
        let mut pool_leg: Option<PoolLeg> = None;
        for mutation in &batch.mutations {
            match mutation {
                Mutation::Balance {
                    key,
                    available,
                    locked,
                } => {
                    let idx = match legs
                        .iter()
                        .position(|l| l.account == key.account && l.currency == key.currency)
                    {
                        Some(idx) => idx,
                        None => {
                            let before = self.load_consistent(&state, key)?;
                            legs.push(BalanceLeg {
                                account: key.account,
                                currency: key.currency.clone(),
                                before,
                                after: before,
                            });
                            legs.len() - 1
                        }
                    };
                    legs[idx].after =
                        apply_balance_delta(key, legs[idx].after, *available, *locked)?;
                }
                Mutation::Pool {
                    currency,
                    balance,
                    reserved,
                } => {
                    let leg = match pool_leg.take() {
                        Some(leg) if &leg.before.currency == currency => leg,
                        Some(_) => {
                            return Err(LedgerError::Internal(
                                "a write batch may touch at most one pool".into(),
                            ));
                        }
                        None => {
                            let before = state
                                .pools
                                .get(currency)
                                .cloned()
                                .unwrap_or_else(|| LiquidityPool::empty(currency.clone()));
                            PoolLeg {
                                after: before.clone(),
                                before,
                            }
                        }
                    };
                    let after = apply_pool_delta(&leg.after, *balance, *reserved)?;
                    pool_leg = Some(PoolLeg {
                        before: leg.before,
                        after,
                    });
                }
            }
        }

        // All preconditions held: write every view, the pool and the audit entry.
        for leg in &legs {
            let key = BalanceKey::new(leg.account, leg.currency.clone());
            for table in state.views.values_mut() {
                table.insert(key.clone(), leg.after);
            }
        }
        if let Some(leg) = &pool_leg {
            state
                .pools
                .insert(leg.after.currency.clone(), leg.after.clone());
        }
        let mut draft = batch.audit;
        draft.legs.clone_from(&legs);
        draft.pool.clone_from(&pool_leg);
        let entry = state.audit.append(draft);

        Ok(CommitReceipt {
            legs,
            pool: pool_leg,
            entry,
        })
    }

    fn reconcile_views(
        &self,
        key: &BalanceKey,
        source: BalanceView,
        mut audit: AuditDraft,
    ) -> Result<(Vec<ViewRepair>, AuditEntry)> {
        let mut state = self.state.lock();
        let record = state
            .views
            .get(&source)
            .ok_or(LedgerError::UnknownView(source))?
            .get(key)
            .copied()
            .unwrap_or_default();
        record.check_invariants()?;

        let mut repairs = Vec::with_capacity(self.view_order.len());
        for view in &self.view_order {
            let table = state
                .views
                .get_mut(view)
                .ok_or(LedgerError::UnknownView(*view))?;
            let before = table.insert(key.clone(), record);
            repairs.push(ViewRepair {
                view: *view,
                before,
                after: record,
            });
        }

        let per_view: serde_json::Map<String, serde_json::Value> = repairs
            .iter()
            .map(|r| {
                (
                    r.view.to_string(),
                    json!({ "before": r.before, "after": r.after }),
                )
            })
            .collect();
        audit.details = json!({
            "source_view": source.to_string(),
            "views": per_view,
        });
        let entry = state.audit.append(audit);
        Ok((repairs, entry))
    }

    fn pool(&self, currency: &Currency) -> Result<LiquidityPool> {
        let state = self.state.lock();
        Ok(state
            .pools
            .get(currency)
            .cloned()
            .unwrap_or_else(|| LiquidityPool::empty(currency.clone())))
    }

    fn append_audit(&self, draft: AuditDraft) -> Result<AuditEntry> {
        Ok(self.state.lock().audit.append(draft))
    }

    fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.state.lock().audit.entries().to_vec())
    }

    fn audit_for(&self, account: AccountId, currency: &Currency) -> Result<Vec<AuditEntry>> {
        Ok(self.state.lock().audit.for_balance(account, currency))
    }

    fn verify_audit_chain(&self) -> Result<()> {
        self.state.lock().audit.verify_chain()
    }
}
