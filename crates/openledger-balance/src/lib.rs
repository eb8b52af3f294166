//! # openledger-balance
//!
//! **Balance plane**: the only code path that changes money.
//!
//! ## Architecture
//!
//! 1. **LedgerStore**: conditional multi-key commits replicated to every
//!    redundant balance view, plus liquidity pools and the audit trail
//! 2. **AuditTrail**: append-only, hash-chained record of every write
//! 3. **AtomicBalanceService**: credit / debit / lock / unlock / release
//! 4. **LiquidityChecker**: logged pool checks ahead of platform payouts
//!
//! ## Write Flow
//!
//! ```text
//! caller → AtomicBalanceService.debit() → validate_amount()
//!        → LedgerStore.commit(WriteBatch) → [precondition ✓] → every view + AuditEntry
//!                                          → [precondition ✗] → nothing written
//! ```
//!
//! A commit against a key whose views already disagree is refused and
//! escalated; divergence is only ever repaired by an explicit reconcile.

pub mod audit_trail;
pub mod balance_service;
pub mod liquidity;
pub mod store;

pub use audit_trail::{verify_entries, AuditTrail};
pub use balance_service::{AtomicBalanceService, ReleaseReceipt};
pub use liquidity::LiquidityChecker;
pub use store::{CommitReceipt, InMemoryLedgerStore, LedgerStore, Mutation, ViewRepair, WriteBatch};
