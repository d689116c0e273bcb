//! Book listing record and its availability states.

use common::{BookId, UserId};
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// Availability of a book listing.
///
/// Status transitions:
/// ```text
/// InStock ──► Reserved ──► Sold
///                 │
///                 └──► InStock   (reservation cancelled or expired)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BookStatus {
    /// Listed and open to reservation.
    #[default]
    InStock,

    /// Held by a confirmed reservation, awaiting handover.
    Reserved,

    /// Handed over; listing is closed (terminal state).
    Sold,
}

impl BookStatus {
    /// Returns true if a new reservation may be opened in this state.
    pub fn can_reserve(&self) -> bool {
        matches!(self, BookStatus::InStock)
    }

    /// Returns true if the book can be marked sold in this state.
    pub fn can_sell(&self) -> bool {
        matches!(self, BookStatus::Reserved)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::InStock => "InStock",
            BookStatus::Reserved => "Reserved",
            BookStatus::Sold => "Sold",
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A book listing.
///
/// Created and priced by catalog management, which is outside this core.
/// Once a reservation touches the book, only the reconciliation layer
/// mutates its status; price and ownership never change here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Unique listing identifier.
    pub id: BookId,

    /// User who listed the book.
    pub owner: UserId,

    /// Display title.
    pub title: String,

    /// Full purchase price.
    pub price: Money,

    /// Listed for outright purchase.
    pub for_sale: bool,

    /// Listed for timed rental.
    pub for_rent: bool,

    /// Weekly rental fee; present iff the book is rentable.
    pub weekly_fee: Option<Money>,

    /// Current availability.
    pub status: BookStatus,
}

impl Book {
    /// Returns true if the book carries a usable rental listing.
    pub fn is_rentable(&self) -> bool {
        self.for_rent && self.weekly_fee.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale_book() -> Book {
        Book {
            id: BookId::new(),
            owner: UserId::new(1),
            title: "The Master and Margarita".to_string(),
            price: Money::from_rupees(500),
            for_sale: true,
            for_rent: false,
            weekly_fee: None,
            status: BookStatus::InStock,
        }
    }

    #[test]
    fn test_default_status_is_in_stock() {
        assert_eq!(BookStatus::default(), BookStatus::InStock);
    }

    #[test]
    fn test_only_in_stock_can_reserve() {
        assert!(BookStatus::InStock.can_reserve());
        assert!(!BookStatus::Reserved.can_reserve());
        assert!(!BookStatus::Sold.can_reserve());
    }

    #[test]
    fn test_only_reserved_can_sell() {
        assert!(!BookStatus::InStock.can_sell());
        assert!(BookStatus::Reserved.can_sell());
        assert!(!BookStatus::Sold.can_sell());
    }

    #[test]
    fn test_rentable_requires_fee() {
        let mut book = sale_book();
        assert!(!book.is_rentable());

        book.for_rent = true;
        assert!(!book.is_rentable());

        book.weekly_fee = Some(Money::from_rupees(50));
        assert!(book.is_rentable());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BookStatus::InStock.to_string(), "InStock");
        assert_eq!(BookStatus::Reserved.to_string(), "Reserved");
        assert_eq!(BookStatus::Sold.to_string(), "Sold");
    }
}
