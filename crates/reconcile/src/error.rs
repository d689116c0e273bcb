//! Reconciliation error taxonomy.

use common::{BookId, ReservationId};
use domain::DomainError;
use ledger::LedgerError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by the reconciliation engine.
///
/// `Reserve` propagates all of these to its caller. The callback path never
/// surfaces any of them (it always produces a redirect), and the sweeper
/// swallows and logs per-reservation failures.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The book does not exist.
    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The book is unavailable, already held, or the buyer owns it.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request itself is malformed for this book.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The actor lacks permission for the requested mutation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation is not valid for the reservation's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A gateway call required for the operation to proceed failed.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(#[from] GatewayError),

    /// An optimistic write raced and lost twice; the caller should re-query.
    #[error("Write conflict: {0}")]
    VersionConflict(String),

    /// The ledger itself failed.
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for ReconcileError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::VersionConflict { .. } => ReconcileError::VersionConflict(err.to_string()),
            other => ReconcileError::Ledger(other),
        }
    }
}

impl From<DomainError> for ReconcileError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::BookUnavailable { .. } | DomainError::OwnBookReservation { .. } => {
                ReconcileError::Conflict(err.to_string())
            }
            DomainError::NotForSale
            | DomainError::NotRentable
            | DomainError::InvalidRentalWeeks { .. } => {
                ReconcileError::InvalidArgument(err.to_string())
            }
            DomainError::InvalidTransition { .. } => ReconcileError::InvalidState(err.to_string()),
        }
    }
}

/// Convenience type alias for reconciliation results.
pub type Result<T> = std::result::Result<T, ReconcileError>;
