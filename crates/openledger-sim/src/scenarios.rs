//! Scenario drivers. Each builds a fresh ledger from the config, runs its
//! traffic and finishes with an integrity sweep and a supply check.

use std::collections::BTreeMap;
use std::sync::Arc;

use openledger_balance::AtomicBalanceService;
use openledger_settlement::{
    EscrowEngine, FixedFeeSchedule, IdempotencyGuard, IntegrityService, SupplyConservation,
    SweepReport,
};
use openledger_types::{
    AccountId, ActionType, BalanceKey, BalanceSnapshot, Currency, LedgerConfig, LedgerError,
    LiquidityPool, Operation, Result, TradeId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: &'static str,
    pub balances: Vec<BalanceSnapshot>,
    pub pools: Vec<LiquidityPool>,
    pub audit_entries: usize,
    pub sweep: SweepReport,
    pub supply_conserved: bool,
    pub notes: Vec<String>,
}

struct Harness {
    balances: Arc<AtomicBalanceService>,
    escrow: EscrowEngine,
    guard: IdempotencyGuard,
    integrity: IntegrityService,
}

impl Harness {
    fn new(config: &LedgerConfig) -> Result<Self> {
        let balances = Arc::new(AtomicBalanceService::in_memory(config)?);
        Ok(Self {
            escrow: EscrowEngine::new(Arc::clone(&balances)),
            guard: IdempotencyGuard::in_memory(config),
            integrity: IntegrityService::for_service(&balances),
            balances,
        })
    }

    fn finish(
        &self,
        scenario: &'static str,
        config: &LedgerConfig,
        mut notes: Vec<String>,
    ) -> Result<Report> {
        let store = self.balances.store();
        let sweep = self.integrity.sweep()?;
        store.verify_audit_chain()?;

        let supply_conserved = match SupplyConservation::check_store(store.as_ref()) {
            Ok(_) => true,
            Err(err @ LedgerError::SupplyInvariantViolation { .. }) => {
                notes.push(err.to_string());
                false
            }
            Err(err) => return Err(err),
        };

        let audit_entries = store.audit_entries()?.len();
        let head = audit_entries as u64;
        let balances = store
            .keys()?
            .into_iter()
            .map(|key| Ok(BalanceSnapshot::new(&key, store.read(&key)?, head)))
            .collect::<Result<Vec<_>>>()?;
        let pools = config
            .currencies
            .iter()
            .map(|c| store.pool(&c.code))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|p| !p.balance.is_zero() || !p.reserved.is_zero())
            .collect();

        tracing::info!(
            scenario,
            balances = balances.len(),
            audit_entries,
            healthy = sweep.is_healthy(),
            supply_conserved,
            "Scenario finished"
        );
        Ok(Report {
            scenario,
            balances,
            pools,
            audit_entries,
            sweep,
            supply_conserved,
            notes,
        })
    }
}

fn op(action: ActionType, reference: impl Into<String>) -> Operation {
    Operation::new(action, reference)
}

/// The canonical walkthrough: lock/release with a fee, escrow round trip,
/// idempotent withdrawal, pool payouts (one from a reservation, one refused
/// for liquidity).
pub fn end_to_end(config: &LedgerConfig) -> Result<Report> {
    let h = Harness::new(config)?;
    let svc = &h.balances;
    let btc = Currency::new("BTC");
    let usdt = Currency::new("USDT");
    let x = AccountId::new();
    let y = AccountId::new();
    let mut notes = Vec::new();

    svc.credit(x, &btc, Decimal::ONE, &op(ActionType::Deposit, "dep-x"))?;
    svc.lock(x, &btc, Decimal::new(4, 1), &op(ActionType::TradeSell, "trade-1"))?;
    let release = svc.release(
        x,
        &btc,
        Decimal::new(4, 1),
        y,
        Decimal::ONE,
        &op(ActionType::TradeSell, "trade-1"),
    )?;
    notes.push(format!(
        "release: net {} to {y}, fee {}",
        release.split.net, release.split.fee
    ));
    h.integrity.verify_default(x, &btc)?;
    h.integrity.verify_default(y, &btc)?;

    svc.credit(x, &usdt, Decimal::new(100, 0), &op(ActionType::Deposit, "dep-usdt"))?;
    let cancelled = TradeId::new();
    h.escrow.open_escrow(x, &usdt, Decimal::new(100, 0), cancelled)?;
    h.escrow.cancel_escrow(cancelled)?;
    let settled = TradeId::new();
    h.escrow.open_escrow(x, &usdt, Decimal::new(100, 0), settled)?;
    let schedule = FixedFeeSchedule::new(Decimal::ONE);
    let settlement = h.escrow.settle_with_schedule(settled, y, &schedule)?;
    notes.push(format!(
        "escrow {settled}: {}",
        settlement.lock.status
    ));

    for attempt in 0..2 {
        let withdrawal = h.guard.execute(y, ActionType::Withdrawal, "withdraw-1", |correlation| {
            let request = op(ActionType::Withdrawal, "withdraw-1").with_correlation(correlation);
            svc.debit(y, &usdt, Decimal::new(10, 0), &request)
        })?;
        notes.push(format!(
            "withdrawal attempt {attempt}: replayed={} available={}",
            withdrawal.replayed, withdrawal.value.available
        ));
    }

    svc.credit_pool(&usdt, Decimal::new(1_000, 0), &op(ActionType::Deposit, "pool-seed"))?;
    svc.pay_out_from_pool(y, &usdt, Decimal::new(250, 0), &op(ActionType::Payout, "payout-1"))?;
    let reserved = Decimal::new(100, 0);
    svc.liquidity().reserve(&usdt, reserved, &op(ActionType::Payout, "payout-3"))?;
    svc.pay_out_reserved(x, &usdt, reserved, &op(ActionType::Payout, "payout-3"))?;
    let oversized = Decimal::new(10_000, 0);
    match svc.pay_out_from_pool(y, &usdt, oversized, &op(ActionType::Payout, "payout-2")) {
        Err(err @ LedgerError::LiquidityShortage { .. }) => {
            notes.push(format!("payout-2 refused: {err}"));
        }
        Err(err) => return Err(err),
        Ok(_) => notes.push("payout-2 unexpectedly succeeded".into()),
    }

    h.finish("end-to-end", config, notes)
}

/// `threads` concurrent debits of `amount` against a balance of
/// `(threads - 1) * amount`.
pub fn concurrent(config: &LedgerConfig, threads: usize, amount: Decimal) -> Result<Report> {
    if threads == 0 {
        return Err(LedgerError::Configuration("threads must be > 0".into()));
    }
    let h = Harness::new(config)?;
    let svc = &h.balances;
    let btc = Currency::new("BTC");
    let account = AccountId::new();
    let funded = amount * Decimal::from(threads - 1);
    if !funded.is_zero() {
        svc.credit(account, &btc, funded, &op(ActionType::Deposit, "fund"))?;
    }

    let outcomes: Vec<Result<BalanceSnapshot>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let btc = &btc;
                let request = op(ActionType::Withdrawal, format!("w-{i}"));
                s.spawn(move || svc.debit(account, btc, amount, &request))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(LedgerError::Internal("debit thread panicked".into())))
            })
            .collect()
    });

    let mut codes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for outcome in &outcomes {
        let code = match outcome {
            Ok(_) => "OK",
            Err(err) => err.code(),
        };
        *codes.entry(code).or_default() += 1;
    }
    let remaining = svc.balance(account, &btc)?;
    let notes = vec![
        format!("outcomes: {codes:?}"),
        format!("remaining available: {}", remaining.available),
    ];
    h.finish("concurrent", config, notes)
}

/// Random traffic across `accounts` accounts and every configured currency.
pub fn stress(
    config: &LedgerConfig,
    ops: usize,
    accounts: usize,
    seed: Option<u64>,
) -> Result<Report> {
    if accounts < 2 {
        return Err(LedgerError::Configuration("stress needs at least 2 accounts".into()));
    }
    let h = Harness::new(config)?;
    let svc = &h.balances;
    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let accounts: Vec<AccountId> = (0..accounts).map(|_| AccountId::new()).collect();
    let mut currencies: Vec<(Currency, u32)> = config
        .currencies
        .iter()
        .map(|c| (c.code.clone(), c.precision))
        .collect();
    if currencies.is_empty() {
        currencies.push((Currency::new("BTC"), config.default_precision));
    }
    let mut open: Vec<TradeId> = Vec::new();
    let mut codes: BTreeMap<&'static str, usize> = BTreeMap::new();

    for i in 0..ops {
        let account = accounts[rng.gen_range(0..accounts.len())];
        let (currency, precision) = &currencies[rng.gen_range(0..currencies.len())];
        let amount = Decimal::new(rng.gen_range(1..=100_000), (*precision).min(4));
        let reference = format!("stress-{i}");

        let result: Result<()> = match rng.gen_range(0..7) {
            0 => svc
                .credit(account, currency, amount, &op(ActionType::Deposit, reference))
                .map(|_| ()),
            1 => svc
                .debit(account, currency, amount, &op(ActionType::Withdrawal, reference))
                .map(|_| ()),
            2 => {
                let trade = TradeId::new();
                h.escrow.open_escrow(account, currency, amount, trade).map(|_| open.push(trade))
            }
            3 if !open.is_empty() => {
                let trade = open.swap_remove(rng.gen_range(0..open.len()));
                let fee = Decimal::new(rng.gen_range(0..=200), 2);
                h.escrow.release_escrow(trade, account, fee).map(|_| ())
            }
            4 if !open.is_empty() => {
                let trade = open.swap_remove(rng.gen_range(0..open.len()));
                h.escrow.cancel_escrow(trade).map(|_| ())
            }
            5 => svc.credit_pool(currency, amount, &op(ActionType::Deposit, reference)).map(|_| ()),
            _ => svc
                .pay_out_from_pool(account, currency, amount, &op(ActionType::Payout, reference))
                .map(|_| ()),
        };
        let code = match &result {
            Ok(()) => "OK",
            Err(err) => err.code(),
        };
        *codes.entry(code).or_default() += 1;
    }

    // Leave no funds stranded in escrow.
    for trade in open.drain(..) {
        h.escrow.cancel_escrow(trade)?;
    }
    let locked: usize = svc
        .store()
        .keys()?
        .iter()
        .filter(|k: &&BalanceKey| svc.store().read(k).is_ok_and(|r| !r.locked.is_zero()))
        .count();

    let notes = vec![
        format!("seed: {seed}"),
        format!("outcomes: {codes:?}"),
        format!("balances with locked funds after cleanup: {locked}"),
    ];
    h.finish("stress", config, notes)
}
