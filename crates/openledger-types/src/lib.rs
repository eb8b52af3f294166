//! # openledger-types
//!
//! Shared types, errors, and configuration for the **OpenLedger** balance
//! ledger.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`TradeId`], [`CorrelationId`]
//! - **Balance model**: [`BalanceRecord`], [`BalanceKey`], [`BalanceView`],
//!   [`BalanceSnapshot`], [`Currency`]
//! - **Escrow model**: [`EscrowLock`], [`EscrowStatus`]
//! - **Liquidity model**: [`LiquidityPool`], [`LiquidityCheck`]
//! - **Idempotency model**: [`IdempotencyRecord`], [`IdempotencyKey`]
//! - **Audit model**: [`AuditEntry`], [`AuditDraft`], [`AuditEventType`], [`Severity`]
//! - **Arithmetic**: [`FeeSplit`], [`validate_amount`]
//! - **Configuration**: [`LedgerConfig`], [`CurrencyRegistry`]
//! - **Errors**: [`LedgerError`] with `LG_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod amount;
pub mod audit;
pub mod balance;
pub mod config;
pub mod constants;
pub mod currency;
pub mod error;
pub mod escrow;
pub mod idempotency;
pub mod ids;
pub mod liquidity;
pub mod operation;

pub use amount::*;
pub use audit::*;
pub use balance::*;
pub use config::*;
pub use currency::*;
pub use error::*;
pub use escrow::*;
pub use idempotency::*;
pub use ids::*;
pub use liquidity::*;
pub use operation::*;

// Constants are accessed via `openledger_types::constants::FOO`
// (not re-exported to avoid name collisions).
