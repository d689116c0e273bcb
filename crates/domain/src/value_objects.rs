//! Value objects shared across the marketplace domain.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Money amount represented in paise to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in paise (e.g., 50000 = ₹500.00)
    paise: i64,
}

impl Money {
    /// Creates a new Money amount from paise.
    pub fn from_paise(paise: i64) -> Self {
        Self { paise }
    }

    /// Creates a new Money amount from a whole-rupee value.
    pub fn from_rupees(rupees: i64) -> Self {
        Self {
            paise: rupees * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { paise: 0 }
    }

    /// Returns the amount in paise.
    pub fn paise(&self) -> i64 {
        self.paise
    }

    /// Returns the rupee portion (whole number).
    pub fn rupees(&self) -> i64 {
        self.paise / 100
    }

    /// Returns the paise portion (remainder after rupees).
    pub fn paise_part(&self) -> i64 {
        self.paise.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.paise > 0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.paise == 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            paise: self.paise * quantity as i64,
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.paise < 0 {
            write!(f, "-₹{}.{:02}", self.rupees().abs(), self.paise_part())
        } else {
            write!(f, "₹{}.{:02}", self.rupees(), self.paise_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            paise: self.paise + rhs.paise,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            paise: self.paise - rhs.paise,
        }
    }
}

/// Rental duration in whole weeks, restricted to 1–3.
///
/// The bound is enforced at construction so an out-of-range duration can
/// never reach the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RentalWeeks(u8);

impl RentalWeeks {
    /// Maximum rentable duration in weeks.
    pub const MAX: u8 = 3;

    /// Creates a rental duration, rejecting values outside 1–3.
    pub fn new(weeks: u8) -> Result<Self, DomainError> {
        if (1..=Self::MAX).contains(&weeks) {
            Ok(Self(weeks))
        } else {
            Err(DomainError::InvalidRentalWeeks { weeks })
        }
    }

    /// Returns the number of weeks.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the rental window as a calendar duration.
    pub fn duration(&self) -> Duration {
        Duration::weeks(self.0 as i64)
    }
}

impl TryFrom<u8> for RentalWeeks {
    type Error = DomainError;

    fn try_from(weeks: u8) -> Result<Self, Self::Error> {
        Self::new(weeks)
    }
}

impl From<RentalWeeks> for u8 {
    fn from(weeks: RentalWeeks) -> Self {
        weeks.0
    }
}

impl std::fmt::Display for RentalWeeks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}w", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_paise() {
        let money = Money::from_paise(1234);
        assert_eq!(money.paise(), 1234);
        assert_eq!(money.rupees(), 12);
        assert_eq!(money.paise_part(), 34);
    }

    #[test]
    fn test_money_from_rupees() {
        let money = Money::from_rupees(500);
        assert_eq!(money.paise(), 50000);
        assert_eq!(money.rupees(), 500);
        assert_eq!(money.paise_part(), 0);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_paise(1234).to_string(), "₹12.34");
        assert_eq!(Money::from_paise(5).to_string(), "₹0.05");
        assert_eq!(Money::from_paise(-1234).to_string(), "-₹12.34");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_paise(1000);
        let b = Money::from_paise(500);

        assert_eq!((a + b).paise(), 1500);
        assert_eq!((a - b).paise(), 500);
        assert_eq!(a.multiply(3).paise(), 3000);
    }

    #[test]
    fn test_rental_weeks_bounds() {
        assert!(RentalWeeks::new(0).is_err());
        assert!(RentalWeeks::new(1).is_ok());
        assert!(RentalWeeks::new(3).is_ok());
        assert!(RentalWeeks::new(4).is_err());
    }

    #[test]
    fn test_rental_weeks_duration() {
        let weeks = RentalWeeks::new(2).unwrap();
        assert_eq!(weeks.duration(), Duration::days(14));
    }

    #[test]
    fn test_rental_weeks_rejects_out_of_range_json() {
        let parsed: Result<RentalWeeks, _> = serde_json::from_str("5");
        assert!(parsed.is_err());

        let parsed: RentalWeeks = serde_json::from_str("2").unwrap();
        assert_eq!(parsed.as_u8(), 2);
    }
}
