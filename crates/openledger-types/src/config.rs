//! Configuration for an OpenLedger process.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, AccountId, BalanceView, Currency, LedgerError, Result};

/// Top-level ledger configuration.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account credited with settlement fees.
    pub fee_account: AccountId,
    /// Redundant views the store maintains. The first is the primary view.
    pub views: Vec<BalanceView>,
    /// Idempotency record lifetime in seconds.
    pub idempotency_ttl_secs: u64,
    /// Precision for currencies not listed in `currencies`.
    pub default_precision: u32,
    /// Integrity tolerance for currencies not listed in `currencies`.
    pub default_tolerance: Decimal,
    /// Per-currency overrides.
    pub currencies: Vec<CurrencyConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee_account: AccountId::system(constants::FEE_ACCOUNT_NAME),
            views: BalanceView::ALL.to_vec(),
            idempotency_ttl_secs: constants::DEFAULT_IDEMPOTENCY_TTL_SECS,
            default_precision: constants::DEFAULT_PRECISION,
            default_tolerance: constants::DEFAULT_TOLERANCE,
            currencies: vec![
                CurrencyConfig::new("BTC", 8),
                CurrencyConfig::new("ETH", 8),
                CurrencyConfig::new("USDT", 6),
            ],
        }
    }
}

impl LedgerConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns [`LedgerError::Configuration`] for malformed or invalid input.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::Configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the ledger cannot run with.
    ///
    /// # Errors
    /// Returns [`LedgerError::Configuration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.views.is_empty() {
            return Err(LedgerError::Configuration("at least one balance view is required".into()));
        }
        let unique: HashSet<_> = self.views.iter().collect();
        if unique.len() != self.views.len() {
            return Err(LedgerError::Configuration("duplicate balance view".into()));
        }
        if self.idempotency_ttl_secs == 0 {
            return Err(LedgerError::Configuration("idempotency_ttl_secs must be > 0".into()));
        }
        check_spec(&Currency::new("*"), self.default_precision, self.default_tolerance)?;
        let mut seen = HashSet::new();
        for currency in &self.currencies {
            if !seen.insert(currency.code.clone()) {
                return Err(LedgerError::Configuration(format!(
                    "currency {} listed twice",
                    currency.code
                )));
            }
            check_spec(
                &currency.code,
                currency.precision,
                currency.tolerance.unwrap_or(Decimal::ZERO),
            )?;
        }
        Ok(())
    }

    #[must_use]
    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.idempotency_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Build the currency lookup table.
    #[must_use]
    pub fn registry(&self) -> CurrencyRegistry {
        let default = CurrencySpec {
            precision: self.default_precision,
            tolerance: self.default_tolerance,
        };
        let currencies = self
            .currencies
            .iter()
            .map(|c| {
                let spec = CurrencySpec {
                    precision: c.precision,
                    tolerance: c
                        .tolerance
                        .or_else(|| Decimal::try_new(1, c.precision).ok())
                        .unwrap_or(constants::DEFAULT_TOLERANCE),
                };
                (c.code.clone(), spec)
            })
            .collect();
        CurrencyRegistry { currencies, default }
    }
}

fn check_spec(code: &Currency, precision: u32, tolerance: Decimal) -> Result<()> {
    if precision > constants::MAX_PRECISION {
        return Err(LedgerError::Configuration(format!(
            "{code}: precision {precision} exceeds {}",
            constants::MAX_PRECISION
        )));
    }
    if tolerance < Decimal::ZERO {
        return Err(LedgerError::Configuration(format!(
            "{code}: tolerance must not be negative"
        )));
    }
    Ok(())
}

/// Per-currency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    pub code: Currency,
    /// Decimal places of the currency's minimum unit.
    pub precision: u32,
    /// Integrity tolerance. Defaults to one minimum unit.
    #[serde(default)]
    pub tolerance: Option<Decimal>,
}

impl CurrencyConfig {
    #[must_use]
    pub fn new(code: &str, precision: u32) -> Self {
        Self {
            code: Currency::new(code),
            precision,
            tolerance: None,
        }
    }
}

/// Resolved precision and tolerance for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencySpec {
    pub precision: u32,
    pub tolerance: Decimal,
}

/// Currency lookup with a fallback for unlisted currencies.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: HashMap<Currency, CurrencySpec>,
    default: CurrencySpec,
}

impl CurrencyRegistry {
    #[must_use]
    pub fn spec(&self, currency: &Currency) -> CurrencySpec {
        self.currencies.get(currency).copied().unwrap_or(self.default)
    }

    #[must_use]
    pub fn precision(&self, currency: &Currency) -> u32 {
        self.spec(currency).precision
    }

    #[must_use]
    pub fn tolerance(&self, currency: &Currency) -> Decimal {
        self.spec(currency).tolerance
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        LedgerConfig::default().registry()
    }
}
