//! Money value object (minor units to avoid floating point errors).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents money in minor currency units (cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Subtracts, clamping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Adds, clamping at `u64::MAX`
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Signed view for processor APIs and SQL `BIGINT` columns
    ///
    /// Returns `None` above `i64::MAX`.
    #[must_use]
    pub fn to_i64(self) -> Option<i64> {
        i64::try_from(self.0).ok()
    }

    /// Build from a signed amount, rejecting negatives
    #[must_use]
    pub fn from_i64(cents: i64) -> Option<Self> {
        u64::try_from(cents).ok().map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Settlement currency
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// New Zealand dollar
    #[default]
    Nzd,
    /// Australian dollar
    Aud,
    /// US dollar
    Usd,
}

impl Currency {
    /// ISO 4217 code in the lowercase form payment processors expect
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Nzd => "nzd",
            Self::Aud => "aud",
            Self::Usd => "usd",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nzd" => Ok(Self::Nzd),
            "aud" => Ok(Self::Aud),
            "usd" => Ok(Self::Usd),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_major_and_minor_units() {
        assert_eq!(Money::from_cents(10_005).to_string(), "100.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn checked_sub_rejects_negative_results() {
        assert_eq!(Money::from_cents(5).checked_sub(Money::from_cents(6)), None);
        assert_eq!(
            Money::from_cents(6).checked_sub(Money::from_cents(5)),
            Some(Money::from_cents(1))
        );
    }

    #[test]
    fn from_i64_rejects_negatives() {
        assert_eq!(Money::from_i64(-1), None);
        assert_eq!(Money::from_i64(250), Some(Money::from_cents(250)));
    }

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("NZD".parse::<Currency>(), Ok(Currency::Nzd));
        assert!("gbp".parse::<Currency>().is_err());
    }
}
