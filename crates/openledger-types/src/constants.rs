//! System-wide constants for the OpenLedger balance ledger.

use rust_decimal::Decimal;

/// Decimal places used for currencies not listed in the configuration.
pub const DEFAULT_PRECISION: u32 = 8;

/// Largest scale `rust_decimal` can represent.
pub const MAX_PRECISION: u32 = 28;

/// Default integrity tolerance (one unit at [`DEFAULT_PRECISION`]).
pub const DEFAULT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Lifetime of an idempotency record (24 hours).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;

/// Name from which the default platform fee account ID is derived.
pub const FEE_ACCOUNT_NAME: &str = "platform-fees";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenLedger";
