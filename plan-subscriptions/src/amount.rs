//! Fixed-point quantities for prices, allowances and usage
//!
//! Plan prices, feature allowances, supplement grants and ledger entries all
//! share one signed decimal type. Usage decrements are negative amounts, so
//! unlike a pure money type `Amount` is allowed to go below zero.
//!
//! - Uses `Decimal` internally (28-29 significant digits)
//! - All arithmetic is exact and checked
//! - Serializes as string (preserves precision)

use crate::{Result, SubscriptionError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signed fixed-point amount.
///
/// # Examples
///
/// ```rust
/// use plan_subscriptions::Amount;
///
/// let allowance = Amount::from_int(100);
/// let used = Amount::from_int(40);
/// let remaining = allowance.checked_sub(&used).unwrap();
/// assert_eq!(remaining, Amount::from_int(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    /// Create from a whole number of units.
    pub fn from_int(units: i64) -> Self {
        Self {
            value: Decimal::from(units),
        }
    }

    /// Wrap a decimal value.
    pub fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Create from decimal string (e.g., "123.45")
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the string is not a decimal number.
    ///
    /// ```rust
    /// use plan_subscriptions::Amount;
    /// let price = Amount::from_str_checked("9.99").unwrap();
    /// assert_eq!(price.to_string(), "9.99");
    /// ```
    pub fn from_str_checked(s: &str) -> Result<Self> {
        Decimal::from_str(s.trim())
            .map(|value| Self { value })
            .map_err(|e| SubscriptionError::InvalidArgument(format!("invalid amount {s:?}: {e}")))
    }

    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.value < Decimal::ZERO
    }

    /// Checked addition (returns None on overflow)
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }

    /// Checked subtraction (returns None on overflow)
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_sub(other.value)
            .map(|value| Self { value })
    }

    /// Addition that reports overflow as an engine error.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        self.checked_add(other).ok_or(SubscriptionError::Overflow)
    }

    /// Subtraction that reports overflow as an engine error.
    pub fn try_sub(&self, other: &Self) -> Result<Self> {
        self.checked_sub(other).ok_or(SubscriptionError::Overflow)
    }

    /// Sum a sequence of amounts, failing on overflow.
    ///
    /// ```rust
    /// use plan_subscriptions::Amount;
    /// let total = Amount::try_sum([Amount::from_int(3), Amount::from_int(-1)]).unwrap();
    /// assert_eq!(total, Amount::from_int(2));
    /// ```
    pub fn try_sum<I>(amounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Self::zero(), |acc, amount| acc.try_add(&amount))
    }

    /// Same magnitude, opposite sign.
    pub fn negated(&self) -> Self {
        Self { value: -self.value }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<i64> for Amount {
    fn from(units: i64) -> Self {
        Self::from_int(units)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Amount {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_checked(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_creation() {
        let amt = Amount::from_int(1000);
        let amt2 = Amount::from_str_checked("1000").unwrap();
        assert_eq!(amt, amt2);
        assert_eq!(Amount::new(dec!(12.5)).to_string(), "12.5");
        assert!(Amount::from_str_checked("ten").is_err());
    }

    #[test]
    fn test_signed_arithmetic() {
        let a = Amount::from_int(10);
        let b = Amount::from_int(25);

        let diff = a.try_sub(&b).unwrap();
        assert_eq!(diff, Amount::from_int(-15));
        assert!(diff.is_negative());
        assert_eq!(diff.negated(), Amount::from_int(15));
        assert!(!Amount::zero().is_positive());
    }

    #[test]
    fn test_try_sum_reports_overflow() {
        let max = Amount::new(Decimal::MAX);
        assert!(matches!(
            Amount::try_sum([max, max]),
            Err(SubscriptionError::Overflow)
        ));
        assert_eq!(Amount::try_sum(Vec::new()).unwrap(), Amount::zero());
    }

    #[test]
    fn test_serialization_preserves_precision() {
        let amt = Amount::from_str_checked("0.10").unwrap();
        let json = serde_json::to_string(&amt).unwrap();
        let parsed: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amt, parsed);
        assert_eq!(parsed.to_string(), "0.10");
    }
}
