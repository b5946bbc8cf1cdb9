//! Exact decimal money amounts.

use core::iter::Sum;
use core::ops::{Add, Sub};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A monetary amount in the shop's currency.
///
/// Backed by `Decimal`; never converted through binary floating point.
/// Serialized as a string so persisted payloads round-trip exactly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Wrap any amount (used for derived values such as profit, which may be negative).
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Validate a price supplied by a caller: strictly positive, at most 2 decimals.
    pub fn price(amount: Decimal) -> DomainResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "price must be positive (got {amount})"
            )));
        }
        if amount.normalize().scale() > 2 {
            return Err(DomainError::validation(format!(
                "price cannot have more than 2 decimal places (got {amount})"
            )));
        }
        Ok(Self(amount))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid amount '{s}': {e}")))?;
        Ok(Self(amount))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn price_rejects_zero_negative_and_sub_cent() {
        assert!(Money::price(Decimal::ZERO).is_err());
        assert!(Money::price(Decimal::new(-100, 2)).is_err());
        assert!(Money::price(Decimal::new(1001, 3)).is_err());
        assert!(Money::price(Decimal::new(15000, 2)).is_ok());
        // trailing zeros do not count as extra precision
        assert!(Money::price(Decimal::new(150000, 3)).is_ok());
    }

    #[test]
    fn serializes_as_exact_string() {
        let m = Money::price(Decimal::new(15000, 2)).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"150.00\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn display_uses_two_decimals() {
        let m: Money = "0.1".parse().unwrap();
        assert_eq!(m.to_string(), "0.10");
    }

    proptest! {
        /// Summing cents as decimals never drifts from integer arithmetic.
        #[test]
        fn sums_are_exact(cents in prop::collection::vec(1i64..10_000_000i64, 0..50)) {
            let total: Money = cents.iter().map(|c| Money::new(Decimal::new(*c, 2))).sum();
            let expected: i64 = cents.iter().sum();
            prop_assert_eq!(total.amount(), Decimal::new(expected, 2));
        }
    }
}
