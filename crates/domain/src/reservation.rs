//! Reservation record and its lifecycle states.

use chrono::{DateTime, Duration, Utc};
use common::{BookId, ReservationId, UserId};
use serde::{Deserialize, Serialize};

use crate::book::Book;
use crate::error::DomainError;
use crate::value_objects::{Money, RentalWeeks};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
///
/// `Completed` and `Cancelled` are terminal; any event referencing a
/// terminal reservation is a logged no-op, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Awaiting payment confirmation from the gateway.
    #[default]
    Pending,

    /// Payment settled; the book is held for pickup.
    Confirmed,

    /// Book handed over by the owner (terminal state).
    Completed,

    /// Payment failed, buyer withdrew, or the hold expired (terminal state).
    Cancelled,
}

impl ReservationStatus {
    /// Returns true if payment confirmation is accepted in this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if the reservation can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        )
    }

    /// Returns true if the handover can be recorded in this state.
    pub fn can_complete(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Completed => "Completed",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement state of the money side of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// No terminal gateway outcome observed yet.
    #[default]
    Pending,

    /// Gateway reported a successful settlement.
    Paid,

    /// Gateway reported failure, or the hold expired unpaid.
    Failed,

    /// A settled payment was returned to the buyer.
    Refunded,
}

impl PaymentStatus {
    /// Returns true once a terminal gateway outcome has been recorded.
    ///
    /// A settled payment is the idempotency anchor: events arriving after
    /// settlement are no-ops.
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the buyer is paying for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReservationKind {
    /// Full-price purchase of the book.
    Purchase,

    /// Timed rental for a bounded number of weeks.
    Rental { weeks: RentalWeeks },
}

impl ReservationKind {
    /// Returns true for rental reservations.
    pub fn is_rental(&self) -> bool {
        matches!(self, ReservationKind::Rental { .. })
    }

    /// Returns the rental duration, if any.
    pub fn weeks(&self) -> Option<RentalWeeks> {
        match self {
            ReservationKind::Purchase => None,
            ReservationKind::Rental { weeks } => Some(*weeks),
        }
    }
}

/// The record binding a buyer to a book pending payment confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier.
    pub id: ReservationId,

    /// The reserved book.
    pub book_id: BookId,

    /// The buyer.
    pub buyer: UserId,

    /// Purchase or timed rental.
    pub kind: ReservationKind,

    /// Amount owed: full price for a purchase, weekly fee × weeks for a rental.
    pub fee: Money,

    /// Lifecycle state.
    pub status: ReservationStatus,

    /// Settlement state; `Paid` iff status is Confirmed or Completed.
    pub payment_status: PaymentStatus,

    /// Merchant order id registered with the gateway, once created.
    pub order_ref: Option<String>,

    /// Payment deadline. Fixed at creation, never extended.
    pub deadline: DateTime<Utc>,

    /// Rental clock start; stamped once, at payment confirmation.
    pub rental_started_at: Option<DateTime<Utc>>,

    /// Rental return deadline; stamped once, at payment confirmation.
    pub rental_due_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Opens a new reservation against a book.
    ///
    /// Guards: the book must be in stock, the buyer must not own it, and a
    /// rental request needs a rentable listing. The fee and the payment
    /// deadline are fixed here and never recomputed.
    pub fn create(
        book: &Book,
        buyer: UserId,
        kind: ReservationKind,
        now: DateTime<Utc>,
        hold: Duration,
    ) -> Result<Self, DomainError> {
        if !book.status.can_reserve() {
            return Err(DomainError::BookUnavailable {
                status: book.status,
            });
        }
        if book.owner == buyer {
            return Err(DomainError::OwnBookReservation { buyer });
        }

        let fee = match kind {
            ReservationKind::Purchase => {
                if !book.for_sale {
                    return Err(DomainError::NotForSale);
                }
                book.price
            }
            ReservationKind::Rental { weeks } => {
                if !book.is_rentable() {
                    return Err(DomainError::NotRentable);
                }
                let weekly = book.weekly_fee.ok_or(DomainError::NotRentable)?;
                weekly.multiply(weeks.as_u8() as u32)
            }
        };

        Ok(Self {
            id: ReservationId::new(),
            book_id: book.id,
            buyer,
            kind,
            fee,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            order_ref: None,
            deadline: now + hold,
            rental_started_at: None,
            rental_due_at: None,
            created_at: now,
        })
    }

    /// Records a settled payment, moving Pending → Confirmed.
    ///
    /// For rentals this stamps the rental window from the confirmation
    /// instant, so a slow payment does not shrink the rental period.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_confirm() {
            return Err(DomainError::InvalidTransition {
                current: self.status,
                action: "confirm",
            });
        }

        self.status = ReservationStatus::Confirmed;
        self.payment_status = PaymentStatus::Paid;

        if let ReservationKind::Rental { weeks } = self.kind {
            self.rental_started_at = Some(now);
            self.rental_due_at = Some(now + weeks.duration());
        }
        Ok(())
    }

    /// Cancels the reservation.
    ///
    /// A paid reservation moves to `Refunded` (the money goes back), an
    /// unpaid one to `Failed`.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        if !self.status.can_cancel() {
            return Err(DomainError::InvalidTransition {
                current: self.status,
                action: "cancel",
            });
        }

        self.status = ReservationStatus::Cancelled;
        self.payment_status = if self.payment_status == PaymentStatus::Paid {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Failed
        };
        Ok(())
    }

    /// Records the handover, moving Confirmed → Completed.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        if !self.status.can_complete() {
            return Err(DomainError::InvalidTransition {
                current: self.status,
                action: "complete",
            });
        }
        self.status = ReservationStatus::Completed;
        Ok(())
    }

    /// Returns true if the reservation is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the payment deadline has passed on an open reservation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.deadline
    }

    /// Derived read-time flag: a confirmed or completed rental past its due
    /// date. Pure computation; checking it never mutates anything.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            ReservationStatus::Confirmed | ReservationStatus::Completed
        ) && self.rental_due_at.is_some_and(|due| now > due)
    }
}
