//! # openledger-settlement
//!
//! **Settlement plane**: escrow lifecycle, request deduplication and
//! integrity policing on top of the balance plane.
//!
//! ## Architecture
//!
//! 1. **IdempotencyGuard**: one side effect per `(account, action, key)`
//! 2. **EscrowEngine**: `LOCKED → RELEASED | CANCELLED` via lock / unlock / release
//! 3. **IntegrityService**: verify, sweep and (manually) reconcile balance views
//! 4. **SupplyConservation**: replays the audit trail against stored supply
//!
//! ## Request Flow
//!
//! ```text
//! caller → IdempotencyGuard.execute() → EscrowEngine.release_escrow()
//!        → AtomicBalanceService.release() → IntegrityService.verify()
//! ```

pub mod escrow;
pub mod idempotency;
pub mod integrity;
pub mod supply_conservation;

pub use escrow::{EscrowEngine, EscrowSettlement, FeeSchedule, FixedFeeSchedule};
pub use idempotency::{
    Clock, GuardDecision, IdempotencyGuard, IdempotencyStore, Idempotent,
    InMemoryIdempotencyStore, SystemClock,
};
pub use integrity::{IntegrityReport, IntegrityService, ReconcileReport, SweepReport, ViewValue};
pub use supply_conservation::SupplyConservation;
