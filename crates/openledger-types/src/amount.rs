//! Amount validation and fixed-point fee arithmetic.
//!
//! All money is [`Decimal`]; nothing in the ledger touches floating point.
//! Fees are rounded half-even to the currency's minimum unit and the net
//! leg is the exact remainder, so `fee + net == gross` always holds and no
//! rounding residue can leak out of a settlement.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Result};

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Reject non-positive amounts and amounts finer than the currency's
/// minimum unit.
///
/// # Errors
/// Returns [`LedgerError::InvalidAmount`].
pub fn validate_amount(amount: Decimal, precision: u32) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: "amount must be positive".into(),
        });
    }
    let scale = amount.normalize().scale();
    if scale > precision {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: format!("{scale} decimal places exceeds currency precision {precision}"),
        });
    }
    Ok(())
}

/// Gross amount split into the counterparty's net and the platform fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

impl FeeSplit {
    /// Split `gross` at `fee_percent` (0–100), rounding the fee half-even
    /// to `precision` decimal places.
    ///
    /// # Errors
    /// Returns [`LedgerError::InvalidFeePercent`] for a percent outside
    /// `[0, 100]`.
    pub fn compute(gross: Decimal, fee_percent: Decimal, precision: u32) -> Result<Self> {
        if fee_percent < Decimal::ZERO || fee_percent > ONE_HUNDRED {
            return Err(LedgerError::InvalidFeePercent(fee_percent));
        }
        let raw = gross
            .checked_mul(fee_percent)
            .and_then(|v| v.checked_div(ONE_HUNDRED))
            .ok_or_else(|| LedgerError::InvalidAmount {
                amount: gross,
                reason: "fee computation overflowed".into(),
            })?;
        let fee = raw.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
        Ok(Self {
            gross,
            fee,
            net: gross - fee,
        })
    }

    /// A split with no fee.
    #[must_use]
    pub fn fee_free(gross: Decimal) -> Self {
        Self {
            gross,
            fee: Decimal::ZERO,
            net: gross,
        }
    }

    #[must_use]
    pub fn is_conserving(&self) -> bool {
        self.fee + self.net == self.gross
    }
}
