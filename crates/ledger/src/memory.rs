use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, PaymentId, ReservationId, UserId};
use domain::{Book, Payment, Reservation};
use tokio::sync::RwLock;

use crate::{
    LedgerError, Result,
    store::{Expected, LedgerStore, RecordKind, Version, Versioned, Write},
};

#[derive(Default)]
struct LedgerState {
    books: HashMap<BookId, Versioned<Book>>,
    reservations: HashMap<ReservationId, Versioned<Reservation>>,
    payments: HashMap<PaymentId, Versioned<Payment>>,
}

impl LedgerState {
    /// Checks one write's expectation without applying anything.
    fn check(&self, write: &Write) -> Result<()> {
        match write {
            Write::Book { book, expected } => check_expectation(
                RecordKind::Book,
                book.id.to_string(),
                *expected,
                self.books.get(&book.id).map(|v| v.version),
            ),
            Write::Reservation {
                reservation,
                expected,
            } => check_expectation(
                RecordKind::Reservation,
                reservation.id.to_string(),
                *expected,
                self.reservations.get(&reservation.id).map(|v| v.version),
            ),
            Write::Payment { payment, expected } => check_expectation(
                RecordKind::Payment,
                payment.id.to_string(),
                *expected,
                self.payments.get(&payment.id).map(|v| v.version),
            ),
            // Removes are unconditional; deleting an absent record is a no-op.
            Write::RemoveReservation { .. } | Write::RemovePayment { .. } => Ok(()),
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::Book { book, expected } => {
                let version = expected.as_version().next();
                self.books.insert(book.id, Versioned::new(book, version));
            }
            Write::Reservation {
                reservation,
                expected,
            } => {
                let version = expected.as_version().next();
                self.reservations
                    .insert(reservation.id, Versioned::new(reservation, version));
            }
            Write::Payment { payment, expected } => {
                let version = expected.as_version().next();
                self.payments
                    .insert(payment.id, Versioned::new(payment, version));
            }
            Write::RemoveReservation { id } => {
                self.reservations.remove(&id);
            }
            Write::RemovePayment { id } => {
                self.payments.remove(&id);
            }
        }
    }
}

fn check_expectation(
    kind: RecordKind,
    id: String,
    expected: Expected,
    actual: Option<Version>,
) -> Result<()> {
    let actual = actual.unwrap_or(Version::initial());
    if expected.as_version() != actual {
        return Err(LedgerError::VersionConflict {
            kind,
            id,
            expected: expected.as_version(),
            actual,
        });
    }
    Ok(())
}

/// In-memory ledger implementation.
///
/// Serves both as the test double and as the default runtime store. A single
/// write lock around the whole state makes `commit` trivially atomic while
/// preserving the same conditional-write semantics as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of reservations stored.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Returns the number of payments stored.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn book(&self, id: BookId) -> Result<Option<Versioned<Book>>> {
        Ok(self.state.read().await.books.get(&id).cloned())
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn payment_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Versioned<Payment>>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.record.reservation_id == reservation_id)
            .cloned())
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<()> {
        let mut state = self.state.write().await;

        // Validate every expectation before touching anything, so a stale
        // write leaves the batch unapplied.
        for write in &writes {
            state.check(write)?;
        }
        for write in writes {
            state.apply(write);
        }
        Ok(())
    }

    async fn active_reservation_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Option<Versioned<Reservation>>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .find(|r| r.record.book_id == book_id && !r.record.is_terminal())
            .cloned())
    }

    async fn expired_pending_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>> {
        let state = self.state.read().await;
        let mut expired: Vec<&Versioned<Reservation>> = state
            .reservations
            .values()
            .filter(|r| r.record.is_expired(cutoff))
            .collect();
        expired.sort_by_key(|r| r.record.deadline);
        Ok(expired.iter().map(|r| r.record.id).collect())
    }

    async fn reservations_for_buyer(&self, buyer: UserId) -> Result<Vec<Versioned<Reservation>>> {
        let state = self.state.read().await;
        let mut found: Vec<Versioned<Reservation>> = state
            .reservations
            .values()
            .filter(|r| r.record.buyer == buyer)
            .cloned()
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse(r.record.created_at));
        Ok(found)
    }

    async fn reservations_for_owner(&self, owner: UserId) -> Result<Vec<Versioned<Reservation>>> {
        let state = self.state.read().await;
        let owned_books: Vec<BookId> = state
            .books
            .values()
            .filter(|b| b.record.owner == owner)
            .map(|b| b.record.id)
            .collect();
        let mut found: Vec<Versioned<Reservation>> = state
            .reservations
            .values()
            .filter(|r| owned_books.contains(&r.record.book_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse(r.record.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::{BookStatus, Money, ReservationKind};

    fn now() -> DateTime<Utc> {
        "2025-03-01T12:00:00Z".parse().unwrap()
    }

    fn test_book(owner: i64) -> Book {
        Book {
            id: BookId::new(),
            owner: UserId::new(owner),
            title: "A ledger test book".to_string(),
            price: Money::from_rupees(200),
            for_sale: true,
            for_rent: false,
            weekly_fee: None,
            status: BookStatus::InStock,
        }
    }

    fn test_reservation(book: &Book, created_at: DateTime<Utc>) -> Reservation {
        Reservation::create(
            book,
            UserId::new(99),
            ReservationKind::Purchase,
            created_at,
            Duration::hours(24),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn commit_new_records_and_read_back() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);
        let book_id = book.id;

        ledger
            .commit(vec![Write::Book {
                book,
                expected: Expected::New,
            }])
            .await
            .unwrap();

        let stored = ledger.book(book_id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::first());
        assert_eq!(stored.record.id, book_id);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);

        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::New,
            }])
            .await
            .unwrap();

        // Writing as if the record were still new must fail.
        let result = ledger
            .commit(vec![Write::Book {
                book,
                expected: Expected::New,
            }])
            .await;

        assert!(matches!(result, Err(LedgerError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn conflicting_batch_applies_nothing() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);
        let reservation = test_reservation(&book, now());
        let payment = Payment::for_reservation(&reservation, "RES-1", now());

        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::New,
            }])
            .await
            .unwrap();

        // Reservation is fine, but the book expectation is stale.
        let result = ledger
            .commit(vec![
                Write::Reservation {
                    reservation: reservation.clone(),
                    expected: Expected::New,
                },
                Write::Payment {
                    payment,
                    expected: Expected::New,
                },
                Write::Book {
                    book,
                    expected: Expected::New,
                },
            ])
            .await;

        assert!(matches!(result, Err(LedgerError::VersionConflict { .. })));
        assert_eq!(ledger.reservation_count().await, 0);
        assert_eq!(ledger.payment_count().await, 0);
    }

    #[tokio::test]
    async fn update_at_current_version_bumps_it() {
        let ledger = InMemoryLedger::new();
        let mut book = test_book(1);

        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::New,
            }])
            .await
            .unwrap();

        book.status = BookStatus::Reserved;
        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::Version(Version::first()),
            }])
            .await
            .unwrap();

        let stored = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
        assert_eq!(stored.record.status, BookStatus::Reserved);
    }

    #[tokio::test]
    async fn compensating_delete_removes_pair() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);
        let reservation = test_reservation(&book, now());
        let payment = Payment::for_reservation(&reservation, "RES-1", now());
        let (rid, pid) = (reservation.id, payment.id);

        ledger
            .commit(vec![
                Write::Reservation {
                    reservation,
                    expected: Expected::New,
                },
                Write::Payment {
                    payment,
                    expected: Expected::New,
                },
            ])
            .await
            .unwrap();

        ledger
            .commit(vec![
                Write::RemovePayment { id: pid },
                Write::RemoveReservation { id: rid },
            ])
            .await
            .unwrap();

        assert!(ledger.reservation(rid).await.unwrap().is_none());
        assert!(ledger.payment(pid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payment_lookup_by_reservation() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);
        let reservation = test_reservation(&book, now());
        let payment = Payment::for_reservation(&reservation, "RES-1", now());
        let rid = reservation.id;

        ledger
            .commit(vec![
                Write::Reservation {
                    reservation,
                    expected: Expected::New,
                },
                Write::Payment {
                    payment: payment.clone(),
                    expected: Expected::New,
                },
            ])
            .await
            .unwrap();

        let found = ledger.payment_for_reservation(rid).await.unwrap().unwrap();
        assert_eq!(found.record.id, payment.id);
        assert!(
            ledger
                .payment_for_reservation(ReservationId::new())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn expired_scan_returns_only_overdue_pending() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);

        let fresh = test_reservation(&book, now());
        let stale = test_reservation(&book, now() - Duration::hours(30));
        let mut settled = test_reservation(&book, now() - Duration::hours(30));
        settled.confirm(now() - Duration::hours(29)).unwrap();
        let stale_id = stale.id;

        for reservation in [fresh, stale, settled] {
            ledger
                .commit(vec![Write::Reservation {
                    reservation,
                    expected: Expected::New,
                }])
                .await
                .unwrap();
        }

        let expired = ledger.expired_pending_reservations(now()).await.unwrap();
        assert_eq!(expired, vec![stale_id]);
    }

    #[tokio::test]
    async fn active_reservation_ignores_terminal_ones() {
        let ledger = InMemoryLedger::new();
        let book = test_book(1);

        let mut cancelled = test_reservation(&book, now());
        cancelled.cancel().unwrap();
        let open = test_reservation(&book, now());
        let open_id = open.id;

        for reservation in [cancelled, open] {
            ledger
                .commit(vec![Write::Reservation {
                    reservation,
                    expected: Expected::New,
                }])
                .await
                .unwrap();
        }

        let active = ledger
            .active_reservation_for_book(book.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.record.id, open_id);
    }

    #[tokio::test]
    async fn listings_sort_newest_first() {
        let ledger = InMemoryLedger::new();
        let book = test_book(7);
        let older = test_reservation(&book, now() - Duration::hours(2));
        let newer = test_reservation(&book, now());
        let (older_id, newer_id) = (older.id, newer.id);

        ledger
            .commit(vec![Write::Book {
                book: book.clone(),
                expected: Expected::New,
            }])
            .await
            .unwrap();
        for reservation in [older, newer] {
            ledger
                .commit(vec![Write::Reservation {
                    reservation,
                    expected: Expected::New,
                }])
                .await
                .unwrap();
        }

        let for_buyer = ledger
            .reservations_for_buyer(UserId::new(99))
            .await
            .unwrap();
        assert_eq!(
            for_buyer.iter().map(|r| r.record.id).collect::<Vec<_>>(),
            vec![newer_id, older_id]
        );

        let for_owner = ledger.reservations_for_owner(UserId::new(7)).await.unwrap();
        assert_eq!(for_owner.len(), 2);
        assert!(
            ledger
                .reservations_for_owner(UserId::new(8))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
