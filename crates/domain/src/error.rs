//! Domain error types.

use common::UserId;
use thiserror::Error;

use crate::book::BookStatus;
use crate::reservation::ReservationStatus;

/// Errors raised by the pure domain layer when a guard rejects an operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// The book is not in a reservable state.
    #[error("Book is not available: status is {status}")]
    BookUnavailable { status: BookStatus },

    /// A buyer attempted to reserve their own listing.
    #[error("User {buyer} owns this book and cannot reserve it")]
    OwnBookReservation { buyer: UserId },

    /// The book is not listed for sale.
    #[error("Book is not listed for sale")]
    NotForSale,

    /// A rental was requested on a book without a rental listing.
    #[error("Book is not available for rental")]
    NotRentable,

    /// Rental duration outside the allowed 1–3 week range.
    #[error("Invalid rental duration: {weeks} weeks (allowed: 1-3)")]
    InvalidRentalWeeks { weeks: u8 },

    /// The reservation is not in a state that permits the action.
    #[error("Cannot {action} a reservation in {current} state")]
    InvalidTransition {
        current: ReservationStatus,
        action: &'static str,
    },
}
