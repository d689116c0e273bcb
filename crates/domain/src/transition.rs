//! The single transition function of the reconciliation engine.
//!
//! Gateway callbacks, on-demand status polls, and the expiry sweeper all
//! observe the gateway and feed the result through [`decide`]. None of them
//! re-implement status updates; they differ only in *when* they look.

use chrono::{DateTime, Utc};

use crate::reservation::Reservation;

/// What a gateway poll reported about an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReport {
    /// The payment settled.
    Completed {
        /// Gateway transaction id, when the provider exposes one.
        transaction_id: Option<String>,
    },

    /// The payment reached a non-success terminal state.
    Failed,

    /// No terminal state yet.
    Pending,
}

/// The decided next step for a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Settle: Pending → Confirmed, book held.
    Confirm,

    /// Close unpaid: Pending → Cancelled, book stays in stock.
    Cancel,

    /// Nothing to do. Duplicate, late, or still-pending events land here.
    Noop,
}

/// Decides the transition for `reservation` given a fresh gateway report.
///
/// Rules:
/// - terminal reservations and settled payments never move again, so a
///   replayed callback, a concurrent poll, or a duplicate sweep all decide
///   `Noop`;
/// - an observed success settles the reservation while it is still open —
///   deadline enforcement happens only through the expiry cancel, so a
///   success caught by the sweeper's final poll wins even when the sweep
///   tick fires exactly at the deadline;
/// - an observed failure cancels immediately;
/// - a still-pending order cancels once the deadline has passed, and is
///   otherwise left alone.
pub fn decide(reservation: &Reservation, report: &GatewayReport, now: DateTime<Utc>) -> Transition {
    if reservation.status.is_terminal() || reservation.payment_status.is_settled() {
        return Transition::Noop;
    }

    match report {
        GatewayReport::Completed { .. } => Transition::Confirm,
        GatewayReport::Failed => Transition::Cancel,
        GatewayReport::Pending => {
            if now >= reservation.deadline {
                Transition::Cancel
            } else {
                Transition::Noop
            }
        }
    }
}
