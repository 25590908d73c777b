//! Monetary primitives
//!
//! Every amount in the ledger is an integer count of minor units (cents,
//! centimes, fils...). Floating point never takes part in arithmetic; a
//! `Decimal` is only produced for display through [`CurrencyCode::to_major_units`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest single movement accepted (10^15 minor units)
const MAX_MINOR_UNITS: i64 = 1_000_000_000_000_000;

/// A strictly positive amount of minor units.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Value never exceeds 10^15 minor units
///
/// # Example
/// ```
/// use finitech_ledger::domain::MinorUnits;
///
/// let amount = MinorUnits::new(50_000).unwrap();
/// assert_eq!(amount.value(), 50_000);
/// assert!(MinorUnits::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MinorUnits(i64);

/// Errors that can occur when creating monetary primitives
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(i64),

    #[error("Amount exceeds maximum allowed value ({MAX_MINOR_UNITS})")]
    Overflow,

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),
}

impl MinorUnits {
    /// Create a new amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::Overflow` if value > 10^15
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value <= 0 {
            return Err(AmountError::NotPositive(value));
        }

        if value > MAX_MINOR_UNITS {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value))
    }

    /// Get the raw minor-unit count.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for MinorUnits {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        MinorUnits::new(value)
    }
}

impl From<MinorUnits> for i64 {
    fn from(amount: MinorUnits) -> Self {
        amount.0
    }
}

/// ISO 4217 alphabetic currency code, normalised to upper case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalise a currency code ("mad" -> "MAD").
    pub fn new(code: &str) -> Result<Self, AmountError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AmountError::InvalidCurrency(code.to_string()));
        }

        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of minor-unit digits for this currency.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }

    /// Display value in major units. Never feed the result back into the ledger.
    pub fn to_major_units(&self, minor_units: i64) -> Decimal {
        Decimal::new(minor_units, self.exponent())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyCode::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minor_units_positive() {
        let amount = MinorUnits::new(100);
        assert_eq!(amount.unwrap().value(), 100);
    }

    #[test]
    fn test_minor_units_zero_rejected() {
        assert_eq!(MinorUnits::new(0), Err(AmountError::NotPositive(0)));
    }

    #[test]
    fn test_minor_units_negative_rejected() {
        assert_eq!(MinorUnits::new(-5), Err(AmountError::NotPositive(-5)));
    }

    #[test]
    fn test_minor_units_overflow() {
        assert_eq!(MinorUnits::new(MAX_MINOR_UNITS + 1), Err(AmountError::Overflow));
        assert!(MinorUnits::new(MAX_MINOR_UNITS).is_ok());
    }

    #[test]
    fn test_minor_units_deserialize_validates() {
        let ok: MinorUnits = serde_json::from_str("2500").unwrap();
        assert_eq!(ok.value(), 2500);

        let err = serde_json::from_str::<MinorUnits>("0");
        assert!(err.is_err());
    }

    #[test]
    fn test_currency_code_normalised() {
        let code = CurrencyCode::new(" mad ").unwrap();
        assert_eq!(code.as_str(), "MAD");
    }

    #[test]
    fn test_currency_code_rejects_garbage() {
        assert!(CurrencyCode::new("").is_err());
        assert!(CurrencyCode::new("EURO").is_err());
        assert!(CurrencyCode::new("U$D").is_err());
    }

    #[test]
    fn test_to_major_units_uses_exponent() {
        let mad = CurrencyCode::new("MAD").unwrap();
        assert_eq!(mad.to_major_units(50_000), dec!(500.00));

        let jpy = CurrencyCode::new("JPY").unwrap();
        assert_eq!(jpy.to_major_units(1200), dec!(1200));

        let kwd = CurrencyCode::new("KWD").unwrap();
        assert_eq!(kwd.to_major_units(1500), dec!(1.500));
    }
}
