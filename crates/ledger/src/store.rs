use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, PaymentId, ReservationId, UserId};
use domain::{Book, Payment, Reservation};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Optimistic version token on a stored record.
///
/// A record that does not exist is at `Version::initial()` (0); its first
/// write lands at version 1, and every subsequent write increments by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(i64);

impl Version {
    /// The version of a record that has never been written.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version of a freshly created record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Creates a version from a raw number.
    pub fn new(version: i64) -> Self {
        Self(version)
    }

    /// Returns the next version in sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version number.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record paired with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pairs a record with its version.
    pub fn new(record: T, version: Version) -> Self {
        Self { record, version }
    }
}

/// What a conditional write expects to find in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The record must not exist yet.
    New,

    /// The record must currently be at exactly this version.
    Version(Version),
}

impl Expected {
    /// Returns the expected version as a plain number (`New` expects 0).
    pub fn as_version(&self) -> Version {
        match self {
            Expected::New => Version::initial(),
            Expected::Version(v) => *v,
        }
    }
}

/// The kind of record a ledger operation touched, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Book,
    Reservation,
    Payment,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Book => "book",
            RecordKind::Reservation => "reservation",
            RecordKind::Payment => "payment",
        };
        write!(f, "{name}")
    }
}

/// One conditional write inside an atomic batch.
///
/// The remove variants exist only for the compensating delete that unwinds
/// a reservation whose gateway order was never created.
#[derive(Debug, Clone)]
pub enum Write {
    Book { book: Book, expected: Expected },
    Reservation {
        reservation: Reservation,
        expected: Expected,
    },
    Payment { payment: Payment, expected: Expected },
    RemoveReservation { id: ReservationId },
    RemovePayment { id: PaymentId },
}

/// Core trait for ledger implementations.
///
/// All implementations must be thread-safe (Send + Sync), and `commit` must
/// be atomic: either every write in the batch lands or none does.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reads a book with its current version.
    async fn book(&self, id: BookId) -> Result<Option<Versioned<Book>>>;

    /// Reads a reservation with its current version.
    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>>;

    /// Reads a payment with its current version.
    async fn payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>>;

    /// Reads the payment attached to a reservation (1:1).
    async fn payment_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Versioned<Payment>>>;

    /// Applies a batch of conditional writes atomically.
    ///
    /// Fails with [`crate::LedgerError::VersionConflict`] if any write's
    /// expectation is stale, in which case nothing is applied.
    async fn commit(&self, writes: Vec<Write>) -> Result<()>;

    /// Returns the reservation currently holding the book, if any.
    ///
    /// At most one reservation per book is ever in a non-terminal state.
    async fn active_reservation_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Option<Versioned<Reservation>>>;

    /// Returns ids of Pending reservations whose deadline is at or before
    /// `cutoff`, oldest deadline first. This is the sweeper's work list.
    async fn expired_pending_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>>;

    /// Returns all reservations placed by a buyer, newest first.
    async fn reservations_for_buyer(&self, buyer: UserId) -> Result<Vec<Versioned<Reservation>>>;

    /// Returns all reservations against books listed by `owner`, newest first.
    async fn reservations_for_owner(&self, owner: UserId) -> Result<Vec<Versioned<Reservation>>>;
}
