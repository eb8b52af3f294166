//! Request context carried by every balance-affecting call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CorrelationId;

/// The business action a ledger call performs on behalf of a caller.
///
/// Part of the idempotency identity: the same key under two different
/// action types names two different requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Deposit,
    Withdrawal,
    TradeBuy,
    TradeSell,
    EscrowOpen,
    EscrowRelease,
    EscrowCancel,
    Payout,
    Adjustment,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::TradeBuy => "trade_buy",
            Self::TradeSell => "trade_sell",
            Self::EscrowOpen => "escrow_open",
            Self::EscrowRelease => "escrow_release",
            Self::EscrowCancel => "escrow_cancel",
            Self::Payout => "payout",
            Self::Adjustment => "adjustment",
        };
        f.write_str(s)
    }
}

/// Who asked for an operation and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub action_type: ActionType,
    /// Caller's reference (order id, withdrawal id, trade id, ...).
    pub reference_id: String,
    pub correlation_id: CorrelationId,
}

impl Operation {
    #[must_use]
    pub fn new(action_type: ActionType, reference_id: impl Into<String>) -> Self {
        Self {
            action_type,
            reference_id: reference_id.into(),
            correlation_id: CorrelationId::new(),
        }
    }

    /// Reuse a correlation ID allocated upstream (e.g., by the idempotency guard).
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_display_matches_serde() {
        for action in [ActionType::EscrowRelease, ActionType::TradeSell, ActionType::Payout] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{action}\""));
        }
    }

    #[test]
    fn with_correlation_overrides() {
        let corr = CorrelationId::new();
        let op = Operation::new(ActionType::Deposit, "dep-1").with_correlation(corr);
        assert_eq!(op.correlation_id, corr);
        assert_eq!(op.reference_id, "dep-1");
    }
}
