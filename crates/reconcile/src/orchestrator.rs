//! Reconciliation orchestrator.
//!
//! Drives the reservation state machine with events from three sources —
//! synchronous buyer/seller API calls, gateway callbacks, and the periodic
//! expiry sweeper — and performs the ledger writes. All three trigger
//! sources call the same transition path ([`Orchestrator::apply_status`])
//! rather than each re-implementing status updates.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{BookId, ReservationId, UserId};
use domain::{
    BookStatus, GatewayReport, Money, Payment, PaymentStatus, Reservation, ReservationKind,
    ReservationStatus, Transition, decide,
};
use ledger::{Expected, LedgerError, LedgerStore, Version, Versioned, Write};
use serde::Serialize;

use crate::error::{ReconcileError, Result};
use crate::gateway::{CreateOrderRequest, GatewayState, OrderStatus, PaymentGateway, RefundRequest};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a pending reservation holds before the sweeper may cancel it.
    pub hold: Duration,

    /// Base URL of the inbound callback endpoint, handed to the gateway as
    /// the post-payment redirect.
    pub callback_base: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            hold: Duration::hours(24),
            callback_base: "http://localhost:8000/payments/callback".to_string(),
        }
    }
}

/// What a successful `reserve` hands back to the buyer.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationTicket {
    pub reservation_id: ReservationId,
    pub merchant_order_id: String,
    pub payment_url: String,
    pub amount: Money,
}

/// Where to send the buyer's browser after a callback.
///
/// The callback path never surfaces business errors to the gateway; every
/// outcome maps onto one of these pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    /// Payment settled; reservation confirmed or already completed.
    Success(ReservationId),

    /// No terminal outcome yet, or the gateway was unreachable.
    Pending(ReservationId),

    /// Payment failed, reservation cancelled, or the reservation is unknown.
    Failure(Option<ReservationId>),
}

impl RedirectTarget {
    /// Frontend page this target maps to.
    pub fn page(&self) -> &'static str {
        match self {
            RedirectTarget::Success(_) => "payment-success",
            RedirectTarget::Pending(_) => "payment-pending",
            RedirectTarget::Failure(_) => "payment-failed",
        }
    }

    /// The reservation this redirect refers to, when known.
    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            RedirectTarget::Success(id) | RedirectTarget::Pending(id) => Some(*id),
            RedirectTarget::Failure(id) => *id,
        }
    }
}

/// Point-in-time view of a reservation for read APIs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub kind: ReservationKind,
    pub fee: Money,
    pub deadline: DateTime<Utc>,
    pub rental_started_at: Option<DateTime<Utc>>,
    pub rental_due_at: Option<DateTime<Utc>>,
    /// Derived at read time; never stored.
    pub is_overdue: bool,
    /// Gateway state from a fresh poll, when one happened.
    pub gateway_state: Option<GatewayState>,
    pub transaction_id: Option<String>,
}

/// Orchestrates reservation and payment reconciliation.
///
/// Per-reservation safety comes from optimistic ledger writes plus
/// terminal-state immutability; no cross-reservation locking exists. The
/// book's availability flag is only mutated inside the same atomic write
/// that settles its single active reservation.
pub struct Orchestrator<L, G>
where
    L: LedgerStore,
    G: PaymentGateway,
{
    pub(crate) ledger: L,
    gateway: G,
    config: OrchestratorConfig,
}

impl<L, G> Orchestrator<L, G>
where
    L: LedgerStore,
    G: PaymentGateway,
{
    /// Creates a new orchestrator.
    pub fn new(ledger: L, gateway: G, config: OrchestratorConfig) -> Self {
        Self {
            ledger,
            gateway,
            config,
        }
    }

    /// Opens a reservation and registers the payment order.
    ///
    /// The Reservation and Payment records are persisted atomically before
    /// the gateway call; if `CreateOrder` then fails they are
    /// compensating-deleted, so the book is never held by a reservation that
    /// never reached the gateway. The book record is touched (unchanged)
    /// under its version token, which serializes concurrent reserve attempts
    /// on the same book: the loser's batch fails and surfaces as `Conflict`.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        book_id: BookId,
        buyer: UserId,
        kind: ReservationKind,
    ) -> Result<ReservationTicket> {
        let start = std::time::Instant::now();
        let now = Utc::now();

        let book = self
            .ledger
            .book(book_id)
            .await?
            .ok_or(ReconcileError::BookNotFound(book_id))?;

        if let Some(active) = self.ledger.active_reservation_for_book(book_id).await? {
            return Err(ReconcileError::Conflict(format!(
                "book already has an active reservation ({})",
                active.record.id
            )));
        }

        let mut reservation = Reservation::create(&book.record, buyer, kind, now, self.config.hold)?;
        let merchant_order_id = format!("RES-{}", reservation.id.as_uuid().simple());
        reservation.order_ref = Some(merchant_order_id.clone());
        let payment = Payment::for_reservation(&reservation, &merchant_order_id, now);

        let initial_writes = vec![
            Write::Book {
                book: book.record.clone(),
                expected: Expected::Version(book.version),
            },
            Write::Reservation {
                reservation: reservation.clone(),
                expected: Expected::New,
            },
            Write::Payment {
                payment: payment.clone(),
                expected: Expected::New,
            },
        ];
        self.ledger.commit(initial_writes).await.map_err(|err| {
            if matches!(err, LedgerError::VersionConflict { .. }) {
                ReconcileError::Conflict("book was reserved concurrently".to_string())
            } else {
                err.into()
            }
        })?;

        let request = CreateOrderRequest {
            amount: reservation.fee,
            redirect_url: format!(
                "{}?reservation_id={}",
                self.config.callback_base, reservation.id
            ),
            merchant_order_id: merchant_order_id.clone(),
            metadata: HashMap::from([
                ("reservation_id".to_string(), reservation.id.to_string()),
                ("book_id".to_string(), book_id.to_string()),
                ("buyer_id".to_string(), buyer.to_string()),
            ]),
        };

        match self.gateway.create_order(request).await {
            Ok(created) => {
                let mut settled = payment;
                settled.gateway_order_id = Some(created.order_id);
                self.ledger
                    .commit(vec![Write::Payment {
                        payment: settled,
                        expected: Expected::Version(Version::first()),
                    }])
                    .await?;

                metrics::counter!("reservations_opened_total").increment(1);
                metrics::histogram!("reserve_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    reservation_id = %reservation.id,
                    %book_id,
                    fee = %reservation.fee,
                    "reservation opened"
                );

                Ok(ReservationTicket {
                    reservation_id: reservation.id,
                    merchant_order_id,
                    payment_url: created.payment_url,
                    amount: reservation.fee,
                })
            }
            Err(err) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    error = %err,
                    "gateway order creation failed; rolling back reservation"
                );
                metrics::counter!("gateway_unavailable_total").increment(1);

                self.ledger
                    .commit(vec![
                        Write::RemovePayment { id: payment.id },
                        Write::RemoveReservation { id: reservation.id },
                    ])
                    .await?;

                Err(ReconcileError::GatewayUnavailable(err))
            }
        }
    }

    /// Handles an inbound gateway callback.
    ///
    /// The callback is unauthenticated and may be replayed or forged, so the
    /// payload is only a hint to look now: truth is re-derived with a fresh
    /// `PollStatus` call. Business problems never surface to the caller;
    /// every path produces a redirect target.
    #[tracing::instrument(skip(self))]
    pub async fn handle_callback(&self, reservation_id: ReservationId) -> RedirectTarget {
        match self.callback_inner(reservation_id).await {
            Ok(target) => target,
            Err(ReconcileError::ReservationNotFound(_)) => RedirectTarget::Failure(None),
            Err(err) => {
                tracing::warn!(
                    %reservation_id,
                    error = %err,
                    "callback handling failed; reporting payment as pending"
                );
                RedirectTarget::Pending(reservation_id)
            }
        }
    }

    async fn callback_inner(&self, reservation_id: ReservationId) -> Result<RedirectTarget> {
        let Some(current) = self.ledger.reservation(reservation_id).await? else {
            tracing::warn!(%reservation_id, "callback for unknown reservation");
            return Ok(RedirectTarget::Failure(None));
        };

        let resulting = match self.poll_order(&current.record).await {
            Some(status) => self.apply_status(reservation_id, &status).await?,
            None => current.record.status,
        };

        Ok(match resulting {
            ReservationStatus::Confirmed | ReservationStatus::Completed => {
                RedirectTarget::Success(reservation_id)
            }
            ReservationStatus::Pending => RedirectTarget::Pending(reservation_id),
            ReservationStatus::Cancelled => RedirectTarget::Failure(Some(reservation_id)),
        })
    }

    /// Returns a status snapshot, polling the gateway first if the
    /// reservation is still pending.
    ///
    /// Only the buyer or the book owner may look. A failed poll degrades to
    /// the stored snapshot instead of erroring; the next event retries.
    #[tracing::instrument(skip(self))]
    pub async fn check_status(
        &self,
        reservation_id: ReservationId,
        requester: UserId,
    ) -> Result<StatusSnapshot> {
        let current = self
            .ledger
            .reservation(reservation_id)
            .await?
            .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;
        let book = self
            .ledger
            .book(current.record.book_id)
            .await?
            .ok_or(ReconcileError::BookNotFound(current.record.book_id))?;

        if requester != current.record.buyer && requester != book.record.owner {
            return Err(ReconcileError::Forbidden(
                "only the buyer or the book owner may view this reservation".to_string(),
            ));
        }

        let mut gateway_state = None;
        if current.record.status == ReservationStatus::Pending {
            if let Some(status) = self.poll_order(&current.record).await {
                gateway_state = Some(status.state);
                self.apply_status(reservation_id, &status).await?;
            }
        }

        let refreshed = self
            .ledger
            .reservation(reservation_id)
            .await?
            .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;
        let payment = self.ledger.payment_for_reservation(reservation_id).await?;

        Ok(snapshot(
            &refreshed.record,
            payment.as_ref().map(|p| &p.record),
            gateway_state,
        ))
    }

    /// Records the handover of a confirmed reservation: Confirmed →
    /// Completed, book → Sold, in one atomic write.
    #[tracing::instrument(skip(self))]
    pub async fn mark_collected(
        &self,
        reservation_id: ReservationId,
        owner: UserId,
    ) -> Result<()> {
        let mut retried = false;
        loop {
            let current = self
                .ledger
                .reservation(reservation_id)
                .await?
                .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;
            let book = self
                .ledger
                .book(current.record.book_id)
                .await?
                .ok_or(ReconcileError::BookNotFound(current.record.book_id))?;

            if book.record.owner != owner {
                return Err(ReconcileError::Forbidden(
                    "only the book owner can mark a reservation collected".to_string(),
                ));
            }

            let mut reservation = current.record.clone();
            reservation.complete()?;
            let mut held = book.record.clone();
            held.status = BookStatus::Sold;

            let writes = vec![
                Write::Reservation {
                    reservation,
                    expected: Expected::Version(current.version),
                },
                Write::Book {
                    book: held,
                    expected: Expected::Version(book.version),
                },
            ];
            match self.ledger.commit(writes).await {
                Ok(()) => {
                    metrics::counter!("reservations_completed_total").increment(1);
                    tracing::info!(%reservation_id, "reservation completed; book sold");
                    return Ok(());
                }
                Err(LedgerError::VersionConflict { .. }) if !retried => {
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Buyer-initiated cancellation.
    ///
    /// A pending reservation is closed unpaid; a confirmed one is refunded
    /// in full and the book returned to stock. The refund is requested once
    /// and never retried automatically — a failed refund is logged for
    /// manual intervention.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId, requester: UserId) -> Result<()> {
        let current = self
            .ledger
            .reservation(reservation_id)
            .await?
            .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;

        if current.record.buyer != requester {
            return Err(ReconcileError::Forbidden(
                "only the buyer can cancel a reservation".to_string(),
            ));
        }
        if current.record.is_terminal() {
            return Err(ReconcileError::InvalidState(format!(
                "reservation is already {}",
                current.record.status
            )));
        }

        // The payment may have settled moments ago; reconcile once before
        // deciding whether this cancel needs a refund.
        if current.record.status == ReservationStatus::Pending {
            if let Some(status) = self.poll_order(&current.record).await {
                self.apply_status(reservation_id, &status).await?;
            }
        }

        let mut retried = false;
        loop {
            let current = self
                .ledger
                .reservation(reservation_id)
                .await?
                .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;

            if current.record.is_terminal() {
                // The reconcile pass above may already have closed it.
                return match current.record.status {
                    ReservationStatus::Cancelled => Ok(()),
                    status => Err(ReconcileError::InvalidState(format!(
                        "reservation is already {status}"
                    ))),
                };
            }

            let was_confirmed = current.record.status == ReservationStatus::Confirmed;
            let mut reservation = current.record.clone();
            reservation.cancel()?;

            let mut writes = vec![Write::Reservation {
                reservation,
                expected: Expected::Version(current.version),
            }];

            let payment = self.ledger.payment_for_reservation(reservation_id).await?;
            if let Some(pv) = &payment {
                let mut settled = pv.record.clone();
                if was_confirmed {
                    settled.mark_refunded();
                } else {
                    settled.mark_failed(None);
                }
                writes.push(Write::Payment {
                    payment: settled,
                    expected: Expected::Version(pv.version),
                });
            }

            if was_confirmed {
                let book = self
                    .ledger
                    .book(current.record.book_id)
                    .await?
                    .ok_or(ReconcileError::BookNotFound(current.record.book_id))?;
                let mut released = book.record.clone();
                released.status = BookStatus::InStock;
                writes.push(Write::Book {
                    book: released,
                    expected: Expected::Version(book.version),
                });
            }

            match self.ledger.commit(writes).await {
                Ok(()) => {
                    metrics::counter!("reservations_cancelled_total").increment(1);
                    tracing::info!(%reservation_id, refunding = was_confirmed, "reservation cancelled by buyer");
                    if was_confirmed {
                        self.request_refund(&current.record).await;
                    }
                    return Ok(());
                }
                Err(LedgerError::VersionConflict { .. }) if !retried => {
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns snapshots of all reservations placed by `buyer`, newest first.
    pub async fn reservations_for_buyer(&self, buyer: UserId) -> Result<Vec<StatusSnapshot>> {
        let found = self.ledger.reservations_for_buyer(buyer).await?;
        self.snapshots(found).await
    }

    /// Returns snapshots of all reservations against `owner`'s books,
    /// newest first.
    pub async fn reservations_for_owner(&self, owner: UserId) -> Result<Vec<StatusSnapshot>> {
        let found = self.ledger.reservations_for_owner(owner).await?;
        self.snapshots(found).await
    }

    async fn snapshots(&self, found: Vec<Versioned<Reservation>>) -> Result<Vec<StatusSnapshot>> {
        let mut out = Vec::with_capacity(found.len());
        for rv in found {
            let payment = self.ledger.payment_for_reservation(rv.record.id).await?;
            out.push(snapshot(
                &rv.record,
                payment.as_ref().map(|p| &p.record),
                None,
            ));
        }
        Ok(out)
    }

    /// Applies a freshly observed gateway status to a reservation.
    ///
    /// This is the single transition path shared by callbacks, status polls
    /// and the sweeper. The Payment record's status is read first: once it
    /// is settled the event is a logged no-op, which makes callback replays,
    /// poll/callback races and duplicate sweeps safe. A stale write is
    /// retried exactly once after a fresh read; a second conflict means a
    /// prior writer applied the authoritative outcome, so the event is
    /// dropped and logged.
    pub(crate) async fn apply_status(
        &self,
        reservation_id: ReservationId,
        status: &OrderStatus,
    ) -> Result<ReservationStatus> {
        let report = GatewayReport::from(status);
        let mut retried = false;

        loop {
            let now = Utc::now();
            let current = self
                .ledger
                .reservation(reservation_id)
                .await?
                .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;
            let payment = self.ledger.payment_for_reservation(reservation_id).await?;

            let settled = payment
                .as_ref()
                .is_some_and(|p| p.record.status.is_settled());
            if current.record.is_terminal() || settled {
                self.log_late_event(&current.record, &report);
                metrics::counter!("reconcile_noop_events_total").increment(1);
                return Ok(current.record.status);
            }

            let applied = match decide(&current.record, &report, now) {
                Transition::Noop => return Ok(current.record.status),
                Transition::Confirm => self.apply_confirm(&current, payment, status, now).await,
                Transition::Cancel => self.apply_cancel(&current, payment, status).await,
            };

            match applied {
                Ok(resulting) => return Ok(resulting),
                Err(ReconcileError::VersionConflict(reason)) => {
                    if retried {
                        tracing::warn!(
                            %reservation_id,
                            %reason,
                            "dropping gateway event after repeated write conflicts; a prior writer applied the outcome"
                        );
                        let latest = self
                            .ledger
                            .reservation(reservation_id)
                            .await?
                            .ok_or(ReconcileError::ReservationNotFound(reservation_id))?;
                        return Ok(latest.record.status);
                    }
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn apply_confirm(
        &self,
        current: &Versioned<Reservation>,
        payment: Option<Versioned<Payment>>,
        status: &OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<ReservationStatus> {
        let book = self
            .ledger
            .book(current.record.book_id)
            .await?
            .ok_or(ReconcileError::BookNotFound(current.record.book_id))?;

        let mut reservation = current.record.clone();
        reservation.confirm(now)?;

        let mut held = book.record.clone();
        held.status = BookStatus::Reserved;

        let mut writes = vec![
            Write::Reservation {
                reservation,
                expected: Expected::Version(current.version),
            },
            Write::Book {
                book: held,
                expected: Expected::Version(book.version),
            },
        ];
        if let Some(pv) = payment {
            let mut settled = pv.record.clone();
            settled.mark_paid(status.transaction_id.clone(), Some(status.raw.clone()));
            writes.push(Write::Payment {
                payment: settled,
                expected: Expected::Version(pv.version),
            });
        }

        self.ledger.commit(writes).await?;

        metrics::counter!("reservations_confirmed_total").increment(1);
        tracing::info!(
            reservation_id = %current.record.id,
            transaction_id = ?status.transaction_id,
            "payment settled; reservation confirmed"
        );
        Ok(ReservationStatus::Confirmed)
    }

    async fn apply_cancel(
        &self,
        current: &Versioned<Reservation>,
        payment: Option<Versioned<Payment>>,
        status: &OrderStatus,
    ) -> Result<ReservationStatus> {
        let mut reservation = current.record.clone();
        reservation.cancel()?;

        let mut writes = vec![Write::Reservation {
            reservation,
            expected: Expected::Version(current.version),
        }];
        if let Some(pv) = payment {
            let mut settled = pv.record.clone();
            let raw = match status.state {
                GatewayState::Failed => Some(status.raw.clone()),
                _ => None,
            };
            settled.mark_failed(raw);
            writes.push(Write::Payment {
                payment: settled,
                expected: Expected::Version(pv.version),
            });
        }

        // The book stays InStock: availability only flips on confirmation.
        self.ledger.commit(writes).await?;

        let reason = match status.state {
            GatewayState::Failed => "gateway reported failure",
            _ => "hold expired unpaid",
        };
        metrics::counter!("reservations_cancelled_total").increment(1);
        tracing::info!(reservation_id = %current.record.id, reason, "reservation cancelled");
        Ok(ReservationStatus::Cancelled)
    }

    /// Polls the gateway for a reservation's order.
    ///
    /// Returns `None` when the reservation has no gateway order yet or the
    /// gateway is unreachable — "status temporarily unknown", retried by the
    /// next poll, callback or sweep.
    pub(crate) async fn poll_order(&self, reservation: &Reservation) -> Option<OrderStatus> {
        let order_ref = reservation.order_ref.as_deref()?;
        match self.gateway.poll_status(order_ref).await {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    error = %err,
                    "gateway poll failed; status unknown until the next event"
                );
                None
            }
        }
    }

    fn log_late_event(&self, reservation: &Reservation, report: &GatewayReport) {
        if matches!(report, GatewayReport::Completed { .. })
            && reservation.status == ReservationStatus::Cancelled
            && reservation.payment_status == PaymentStatus::Failed
        {
            // Availability already went back to the marketplace; the late
            // payer is made whole out-of-band via Gateway.Refund.
            metrics::counter!("late_gateway_success_total").increment(1);
            tracing::warn!(
                reservation_id = %reservation.id,
                "gateway success arrived after cancellation; refund the buyer out-of-band"
            );
        } else {
            tracing::info!(
                reservation_id = %reservation.id,
                status = %reservation.status,
                "duplicate or late gateway event ignored"
            );
        }
    }

    async fn request_refund(&self, reservation: &Reservation) {
        let Some(order_ref) = reservation.order_ref.clone() else {
            return;
        };
        let request = RefundRequest {
            merchant_order_id: order_ref,
            amount: reservation.fee,
            refund_id: format!("RF-{}", reservation.id.as_uuid().simple()),
        };

        metrics::counter!("refunds_requested_total").increment(1);
        match self.gateway.refund(request).await {
            Ok(outcome) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    state = %outcome.state,
                    amount = %reservation.fee,
                    "refund requested"
                );
            }
            Err(err) => {
                // Never retried automatically; a blind second attempt could
                // double-refund.
                metrics::counter!("refunds_failed_total").increment(1);
                tracing::error!(
                    reservation_id = %reservation.id,
                    error = %err,
                    "refund request failed; manual intervention required"
                );
            }
        }
    }
}

fn snapshot(
    reservation: &Reservation,
    payment: Option<&Payment>,
    gateway_state: Option<GatewayState>,
) -> StatusSnapshot {
    let now = Utc::now();
    StatusSnapshot {
        reservation_id: reservation.id,
        book_id: reservation.book_id,
        status: reservation.status,
        payment_status: reservation.payment_status,
        kind: reservation.kind,
        fee: reservation.fee,
        deadline: reservation.deadline,
        rental_started_at: reservation.rental_started_at,
        rental_due_at: reservation.rental_due_at,
        is_overdue: reservation.is_overdue(now),
        gateway_state,
        transaction_id: payment.and_then(|p| p.transaction_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use domain::{Book, RentalWeeks};
    use ledger::InMemoryLedger;

    fn setup() -> (
        Orchestrator<InMemoryLedger, InMemoryGateway>,
        InMemoryLedger,
        InMemoryGateway,
    ) {
        let ledger = InMemoryLedger::new();
        let gateway = InMemoryGateway::new();
        let orchestrator = Orchestrator::new(
            ledger.clone(),
            gateway.clone(),
            OrchestratorConfig::default(),
        );
        (orchestrator, ledger, gateway)
    }

    async fn seed_book(ledger: &InMemoryLedger, owner: i64) -> Book {
        let book = Book {
            id: BookId::new(),
            owner: UserId::new(owner),
            title: "The Leopard".to_string(),
            price: Money::from_rupees(500),
            for_sale: true,
            for_rent: true,
            weekly_fee: Some(Money::from_rupees(50)),
            status: BookStatus::InStock,
        };
        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::New,
            }])
            .await
            .unwrap();
        book
    }

    const OWNER: UserId = UserId::new(1);
    const BUYER: UserId = UserId::new(2);
    const STRANGER: UserId = UserId::new(3);

    #[tokio::test]
    async fn test_reserve_happy_path() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;

        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        assert_eq!(ticket.amount, Money::from_rupees(500));
        assert!(ticket.payment_url.contains(&ticket.merchant_order_id));
        assert!(gateway.has_order(&ticket.merchant_order_id));

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Pending);
        assert_eq!(stored.record.payment_status, PaymentStatus::Pending);

        let payment = ledger
            .payment_for_reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.record.status, PaymentStatus::Pending);
        assert!(payment.record.gateway_order_id.is_some());

        // the book is not held until the payment settles
        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::InStock);
    }

    #[tokio::test]
    async fn test_reserve_unknown_book() {
        let (orchestrator, _, _) = setup();
        let result = orchestrator
            .reserve(BookId::new(), BUYER, ReservationKind::Purchase)
            .await;
        assert!(matches!(result, Err(ReconcileError::BookNotFound(_))));
    }

    #[tokio::test]
    async fn test_reserve_own_book_is_conflict() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;

        let result = orchestrator
            .reserve(book.id, OWNER, ReservationKind::Purchase)
            .await;
        assert!(matches!(result, Err(ReconcileError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reserve_rental_on_non_rentable_book() {
        let (orchestrator, ledger, _) = setup();
        let mut book = seed_book(&ledger, 1).await;
        book.for_rent = false;
        book.weekly_fee = None;
        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::Version(Version::first()),
            }])
            .await
            .unwrap();

        let kind = ReservationKind::Rental {
            weeks: RentalWeeks::new(2).unwrap(),
        };
        let result = orchestrator.reserve(book.id, BUYER, kind).await;
        assert!(matches!(result, Err(ReconcileError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_reserve_twice_is_conflict() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;

        orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        let result = orchestrator
            .reserve(book.id, STRANGER, ReservationKind::Purchase)
            .await;
        assert!(matches!(result, Err(ReconcileError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;
        let orchestrator = std::sync::Arc::new(orchestrator);

        let (a, b) = tokio::join!(
            orchestrator.reserve(book.id, BUYER, ReservationKind::Purchase),
            orchestrator.reserve(book.id, STRANGER, ReservationKind::Purchase),
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "exactly one concurrent reserve must win");
        assert_eq!(ledger.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn test_reserve_gateway_failure_rolls_back() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        gateway.set_fail_on_create(true);

        let result = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await;
        assert!(matches!(result, Err(ReconcileError::GatewayUnavailable(_))));

        // no reservation or payment records survive the rollback
        assert_eq!(ledger.reservation_count().await, 0);
        assert_eq!(ledger.payment_count().await, 0);
        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::InStock);

        // and the book is reservable again once the gateway recovers
        gateway.set_fail_on_create(false);
        orchestrator
            .reserve(book.record.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_callback_confirms_on_gateway_success() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        gateway.complete_order(&ticket.merchant_order_id, "TXN-42");
        let target = orchestrator.handle_callback(ticket.reservation_id).await;
        assert_eq!(target, RedirectTarget::Success(ticket.reservation_id));

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Confirmed);
        assert_eq!(stored.record.payment_status, PaymentStatus::Paid);

        let payment = ledger
            .payment_for_reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.record.status, PaymentStatus::Paid);
        assert_eq!(payment.record.transaction_id.as_deref(), Some("TXN-42"));
        assert!(payment.record.gateway_response.is_some());

        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::Reserved);
    }

    #[tokio::test]
    async fn test_callback_is_idempotent() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        gateway.complete_order(&ticket.merchant_order_id, "TXN-42");

        let first = orchestrator.handle_callback(ticket.reservation_id).await;
        let second = orchestrator.handle_callback(ticket.reservation_id).await;
        assert_eq!(first, second);

        let payment = ledger
            .payment_for_reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        // the replay did not touch the settled records again
        assert_eq!(payment.version, Version::new(3));
    }

    #[tokio::test]
    async fn test_callback_failure_cancels() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        gateway.fail_order(&ticket.merchant_order_id);
        let target = orchestrator.handle_callback(ticket.reservation_id).await;
        assert_eq!(
            target,
            RedirectTarget::Failure(Some(ticket.reservation_id))
        );

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Cancelled);
        assert_eq!(stored.record.payment_status, PaymentStatus::Failed);

        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::InStock);
    }

    #[tokio::test]
    async fn test_callback_unknown_reservation() {
        let (orchestrator, _, _) = setup();
        let target = orchestrator.handle_callback(ReservationId::new()).await;
        assert_eq!(target, RedirectTarget::Failure(None));
    }

    #[tokio::test]
    async fn test_callback_with_gateway_down_reports_pending() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        gateway.set_fail_on_poll(true);
        let target = orchestrator.handle_callback(ticket.reservation_id).await;
        assert_eq!(target, RedirectTarget::Pending(ticket.reservation_id));

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_check_status_requires_buyer_or_owner() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        let result = orchestrator
            .check_status(ticket.reservation_id, STRANGER)
            .await;
        assert!(matches!(result, Err(ReconcileError::Forbidden(_))));

        assert!(
            orchestrator
                .check_status(ticket.reservation_id, BUYER)
                .await
                .is_ok()
        );
        assert!(
            orchestrator
                .check_status(ticket.reservation_id, OWNER)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_check_status_applies_pending_transition() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        gateway.complete_order(&ticket.merchant_order_id, "TXN-9");

        let snapshot = orchestrator
            .check_status(ticket.reservation_id, BUYER)
            .await
            .unwrap();
        assert_eq!(snapshot.status, ReservationStatus::Confirmed);
        assert_eq!(snapshot.payment_status, PaymentStatus::Paid);
        assert_eq!(snapshot.gateway_state, Some(GatewayState::Completed));
        assert_eq!(snapshot.transaction_id.as_deref(), Some("TXN-9"));
    }

    #[tokio::test]
    async fn test_check_status_degrades_when_gateway_down() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        gateway.set_fail_on_poll(true);
        let snapshot = orchestrator
            .check_status(ticket.reservation_id, BUYER)
            .await
            .unwrap();
        assert_eq!(snapshot.status, ReservationStatus::Pending);
        assert_eq!(snapshot.gateway_state, None);
    }

    #[tokio::test]
    async fn test_mark_collected_completes_and_sells() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        gateway.complete_order(&ticket.merchant_order_id, "TXN-1");
        orchestrator.handle_callback(ticket.reservation_id).await;

        orchestrator
            .mark_collected(ticket.reservation_id, OWNER)
            .await
            .unwrap();

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Completed);
        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::Sold);

        // a second collect is InvalidState
        let result = orchestrator
            .mark_collected(ticket.reservation_id, OWNER)
            .await;
        assert!(matches!(result, Err(ReconcileError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_mark_collected_rejects_non_owner_and_pending() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        let result = orchestrator
            .mark_collected(ticket.reservation_id, BUYER)
            .await;
        assert!(matches!(result, Err(ReconcileError::Forbidden(_))));

        // still pending: no handover possible
        let result = orchestrator
            .mark_collected(ticket.reservation_id, OWNER)
            .await;
        assert!(matches!(result, Err(ReconcileError::InvalidState(_))));

        gateway.complete_order(&ticket.merchant_order_id, "TXN-1");
        orchestrator.handle_callback(ticket.reservation_id).await;
        orchestrator
            .mark_collected(ticket.reservation_id, OWNER)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_closes_unpaid() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        orchestrator
            .cancel(ticket.reservation_id, BUYER)
            .await
            .unwrap();

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Cancelled);
        assert_eq!(stored.record.payment_status, PaymentStatus::Failed);
        assert_eq!(gateway.refund_count(), 0);

        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::InStock);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_refunds_and_releases_book() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        gateway.complete_order(&ticket.merchant_order_id, "TXN-1");
        orchestrator.handle_callback(ticket.reservation_id).await;

        orchestrator
            .cancel(ticket.reservation_id, BUYER)
            .await
            .unwrap();

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Cancelled);
        assert_eq!(stored.record.payment_status, PaymentStatus::Refunded);

        let payment = ledger
            .payment_for_reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.record.status, PaymentStatus::Refunded);

        assert_eq!(gateway.refund_count(), 1);
        assert_eq!(
            gateway.refunded_amount(&ticket.merchant_order_id),
            Some(Money::from_rupees(500))
        );

        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.record.status, BookStatus::InStock);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_survives_refund_failure() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();
        gateway.complete_order(&ticket.merchant_order_id, "TXN-1");
        orchestrator.handle_callback(ticket.reservation_id).await;

        // refund fails but the cancellation itself stands; the failure is
        // logged for manual intervention, never retried
        gateway.set_fail_on_refund(true);
        orchestrator
            .cancel(ticket.reservation_id, BUYER)
            .await
            .unwrap();

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, ReservationStatus::Cancelled);
        assert_eq!(gateway.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_requires_buyer() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        let result = orchestrator.cancel(ticket.reservation_id, OWNER).await;
        assert!(matches!(result, Err(ReconcileError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_cancel_terminal_is_invalid_state() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        orchestrator
            .cancel(ticket.reservation_id, BUYER)
            .await
            .unwrap();
        let result = orchestrator.cancel(ticket.reservation_id, BUYER).await;
        assert!(matches!(result, Err(ReconcileError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_rental_window_starts_at_confirmation() {
        let (orchestrator, ledger, gateway) = setup();
        let book = seed_book(&ledger, 1).await;
        let kind = ReservationKind::Rental {
            weeks: RentalWeeks::new(2).unwrap(),
        };
        let ticket = orchestrator.reserve(book.id, BUYER, kind).await.unwrap();
        assert_eq!(ticket.amount, Money::from_rupees(100));

        gateway.complete_order(&ticket.merchant_order_id, "TXN-1");
        orchestrator.handle_callback(ticket.reservation_id).await;

        let stored = ledger
            .reservation(ticket.reservation_id)
            .await
            .unwrap()
            .unwrap();
        let started = stored.record.rental_started_at.unwrap();
        let due = stored.record.rental_due_at.unwrap();
        assert_eq!(due - started, Duration::days(14));
        assert!(!stored.record.is_overdue(due));
        assert!(stored.record.is_overdue(due + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_listings_for_buyer_and_owner() {
        let (orchestrator, ledger, _) = setup();
        let book = seed_book(&ledger, 1).await;
        let ticket = orchestrator
            .reserve(book.id, BUYER, ReservationKind::Purchase)
            .await
            .unwrap();

        let mine = orchestrator.reservations_for_buyer(BUYER).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].reservation_id, ticket.reservation_id);

        let theirs = orchestrator.reservations_for_owner(OWNER).await.unwrap();
        assert_eq!(theirs.len(), 1);

        assert!(
            orchestrator
                .reservations_for_buyer(STRANGER)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
