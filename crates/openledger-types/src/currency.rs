//! Currency codes.
//!
//! The ledger never converts between currencies; a `Currency` is only an
//! identity for partitioning balances. Codes are normalised to upper case
//! so `"btc"` and `"BTC"` name the same balance.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalised currency code (e.g., `"BTC"`, `"USDT"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Currency {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for Currency {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalised() {
        assert_eq!(Currency::new(" btc "), Currency::new("BTC"));
        assert_eq!(Currency::from("usdt").as_str(), "USDT");
    }

    #[test]
    fn deserialising_normalises() {
        let c: Currency = serde_json::from_str("\"eth\"").unwrap();
        assert_eq!(c.as_str(), "ETH");
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"ETH\"");
    }
}
