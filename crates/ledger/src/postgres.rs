use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, PaymentId, ReservationId, UserId};
use domain::{
    Book, BookStatus, Money, Payment, PaymentStatus, RentalWeeks, Reservation, ReservationKind,
    ReservationStatus,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Result,
    store::{Expected, LedgerStore, RecordKind, Version, Versioned, Write},
};

/// PostgreSQL-backed ledger implementation.
///
/// One row per record with a `version` column; conditional writes are
/// `UPDATE … WHERE version = $expected` inside a single transaction, so a
/// batch either lands whole or rolls back on the first stale expectation.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_book(row: PgRow) -> Result<Versioned<Book>> {
        let id = BookId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let status = parse_book_status(row.try_get("status")?, id.to_string())?;
        let book = Book {
            id,
            owner: UserId::new(row.try_get("owner_id")?),
            title: row.try_get("title")?,
            price: Money::from_paise(row.try_get("price_paise")?),
            for_sale: row.try_get("for_sale")?,
            for_rent: row.try_get("for_rent")?,
            weekly_fee: row
                .try_get::<Option<i64>, _>("weekly_fee_paise")?
                .map(Money::from_paise),
            status,
        };
        Ok(Versioned::new(book, Version::new(row.try_get("version")?)))
    }

    fn row_to_reservation(row: PgRow) -> Result<Versioned<Reservation>> {
        let id = ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let kind = parse_kind(
            row.try_get("kind")?,
            row.try_get::<Option<i16>, _>("rental_weeks")?,
            id.to_string(),
        )?;
        let reservation = Reservation {
            id,
            book_id: BookId::from_uuid(row.try_get::<Uuid, _>("book_id")?),
            buyer: UserId::new(row.try_get("buyer_id")?),
            kind,
            fee: Money::from_paise(row.try_get("fee_paise")?),
            status: parse_reservation_status(row.try_get("status")?, id.to_string())?,
            payment_status: parse_payment_status(
                row.try_get("payment_status")?,
                RecordKind::Reservation,
                id.to_string(),
            )?,
            order_ref: row.try_get("order_ref")?,
            deadline: row.try_get("deadline")?,
            rental_started_at: row.try_get("rental_started_at")?,
            rental_due_at: row.try_get("rental_due_at")?,
            created_at: row.try_get("created_at")?,
        };
        Ok(Versioned::new(
            reservation,
            Version::new(row.try_get("version")?),
        ))
    }

    fn row_to_payment(row: PgRow) -> Result<Versioned<Payment>> {
        let id = PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let payment = Payment {
            id,
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            merchant_order_id: row.try_get("merchant_order_id")?,
            gateway_order_id: row.try_get("gateway_order_id")?,
            transaction_id: row.try_get("transaction_id")?,
            amount: Money::from_paise(row.try_get("amount_paise")?),
            currency: row.try_get("currency")?,
            status: parse_payment_status(
                row.try_get("status")?,
                RecordKind::Payment,
                id.to_string(),
            )?,
            gateway_response: row.try_get("gateway_response")?,
            created_at: row.try_get("created_at")?,
        };
        Ok(Versioned::new(
            payment,
            Version::new(row.try_get("version")?),
        ))
    }

    async fn apply_write(tx: &mut Transaction<'_, Postgres>, write: &Write) -> Result<()> {
        match write {
            Write::Book { book, expected } => {
                let weekly_fee = book.weekly_fee.map(|m| m.paise());
                let rows = match expected {
                    Expected::New => sqlx::query(
                        r#"
                        INSERT INTO books
                            (id, owner_id, title, price_paise, for_sale, for_rent,
                             weekly_fee_paise, status, version)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
                        ON CONFLICT (id) DO NOTHING
                        "#,
                    )
                    .bind(book.id.as_uuid())
                    .bind(book.owner.as_i64())
                    .bind(&book.title)
                    .bind(book.price.paise())
                    .bind(book.for_sale)
                    .bind(book.for_rent)
                    .bind(weekly_fee)
                    .bind(book.status.as_str())
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                    Expected::Version(v) => sqlx::query(
                        r#"
                        UPDATE books
                        SET owner_id = $2, title = $3, price_paise = $4, for_sale = $5,
                            for_rent = $6, weekly_fee_paise = $7, status = $8,
                            version = version + 1
                        WHERE id = $1 AND version = $9
                        "#,
                    )
                    .bind(book.id.as_uuid())
                    .bind(book.owner.as_i64())
                    .bind(&book.title)
                    .bind(book.price.paise())
                    .bind(book.for_sale)
                    .bind(book.for_rent)
                    .bind(weekly_fee)
                    .bind(book.status.as_str())
                    .bind(v.as_i64())
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                };
                if rows == 0 {
                    return Err(version_conflict(
                        tx,
                        RecordKind::Book,
                        "books",
                        book.id.as_uuid(),
                        *expected,
                    )
                    .await);
                }
            }
            Write::Reservation {
                reservation,
                expected,
            } => {
                let (kind, weeks) = kind_columns(&reservation.kind);
                let rows = match expected {
                    Expected::New => sqlx::query(
                        r#"
                        INSERT INTO reservations
                            (id, book_id, buyer_id, kind, rental_weeks, fee_paise, status,
                             payment_status, order_ref, deadline, rental_started_at,
                             rental_due_at, created_at, version)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1)
                        ON CONFLICT (id) DO NOTHING
                        "#,
                    )
                    .bind(reservation.id.as_uuid())
                    .bind(reservation.book_id.as_uuid())
                    .bind(reservation.buyer.as_i64())
                    .bind(kind)
                    .bind(weeks)
                    .bind(reservation.fee.paise())
                    .bind(reservation.status.as_str())
                    .bind(reservation.payment_status.as_str())
                    .bind(reservation.order_ref.as_deref())
                    .bind(reservation.deadline)
                    .bind(reservation.rental_started_at)
                    .bind(reservation.rental_due_at)
                    .bind(reservation.created_at)
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                    Expected::Version(v) => sqlx::query(
                        r#"
                        UPDATE reservations
                        SET status = $2, payment_status = $3, order_ref = $4,
                            rental_started_at = $5, rental_due_at = $6,
                            version = version + 1
                        WHERE id = $1 AND version = $7
                        "#,
                    )
                    .bind(reservation.id.as_uuid())
                    .bind(reservation.status.as_str())
                    .bind(reservation.payment_status.as_str())
                    .bind(reservation.order_ref.as_deref())
                    .bind(reservation.rental_started_at)
                    .bind(reservation.rental_due_at)
                    .bind(v.as_i64())
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                };
                if rows == 0 {
                    return Err(version_conflict(
                        tx,
                        RecordKind::Reservation,
                        "reservations",
                        reservation.id.as_uuid(),
                        *expected,
                    )
                    .await);
                }
            }
            Write::Payment { payment, expected } => {
                let rows = match expected {
                    Expected::New => sqlx::query(
                        r#"
                        INSERT INTO payments
                            (id, reservation_id, merchant_order_id, gateway_order_id,
                             transaction_id, amount_paise, currency, status,
                             gateway_response, created_at, version)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)
                        ON CONFLICT (id) DO NOTHING
                        "#,
                    )
                    .bind(payment.id.as_uuid())
                    .bind(payment.reservation_id.as_uuid())
                    .bind(&payment.merchant_order_id)
                    .bind(payment.gateway_order_id.as_deref())
                    .bind(payment.transaction_id.as_deref())
                    .bind(payment.amount.paise())
                    .bind(&payment.currency)
                    .bind(payment.status.as_str())
                    .bind(payment.gateway_response.as_ref())
                    .bind(payment.created_at)
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                    Expected::Version(v) => sqlx::query(
                        r#"
                        UPDATE payments
                        SET gateway_order_id = $2, transaction_id = $3, status = $4,
                            gateway_response = $5, version = version + 1
                        WHERE id = $1 AND version = $6
                        "#,
                    )
                    .bind(payment.id.as_uuid())
                    .bind(payment.gateway_order_id.as_deref())
                    .bind(payment.transaction_id.as_deref())
                    .bind(payment.status.as_str())
                    .bind(payment.gateway_response.as_ref())
                    .bind(v.as_i64())
                    .execute(&mut **tx)
                    .await?
                    .rows_affected(),
                };
                if rows == 0 {
                    return Err(version_conflict(
                        tx,
                        RecordKind::Payment,
                        "payments",
                        payment.id.as_uuid(),
                        *expected,
                    )
                    .await);
                }
            }
            Write::RemovePayment { id } => {
                sqlx::query("DELETE FROM payments WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut **tx)
                    .await?;
            }
            Write::RemoveReservation { id } => {
                sqlx::query("DELETE FROM reservations WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Builds the conflict error for a conditional write that matched no row.
async fn version_conflict(
    tx: &mut Transaction<'_, Postgres>,
    kind: RecordKind,
    table: &str,
    id: Uuid,
    expected: Expected,
) -> LedgerError {
    let query = format!("SELECT version FROM {table} WHERE id = $1");
    let actual: Option<i64> = sqlx::query_scalar(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .ok()
        .flatten();

    LedgerError::VersionConflict {
        kind,
        id: id.to_string(),
        expected: expected.as_version(),
        actual: Version::new(actual.unwrap_or(0)),
    }
}

fn kind_columns(kind: &ReservationKind) -> (&'static str, Option<i16>) {
    match kind {
        ReservationKind::Purchase => ("purchase", None),
        ReservationKind::Rental { weeks } => ("rental", Some(weeks.as_u8() as i16)),
    }
}

fn parse_kind(kind: &str, weeks: Option<i16>, id: String) -> Result<ReservationKind> {
    match (kind, weeks) {
        ("purchase", _) => Ok(ReservationKind::Purchase),
        ("rental", Some(weeks)) => {
            let weeks = RentalWeeks::new(weeks as u8).map_err(|e| LedgerError::InvalidRecord {
                kind: RecordKind::Reservation,
                id: id.clone(),
                message: e.to_string(),
            })?;
            Ok(ReservationKind::Rental { weeks })
        }
        _ => Err(LedgerError::InvalidRecord {
            kind: RecordKind::Reservation,
            id,
            message: format!("unknown reservation kind '{kind}'"),
        }),
    }
}

fn parse_book_status(status: &str, id: String) -> Result<BookStatus> {
    match status {
        "InStock" => Ok(BookStatus::InStock),
        "Reserved" => Ok(BookStatus::Reserved),
        "Sold" => Ok(BookStatus::Sold),
        other => Err(LedgerError::InvalidRecord {
            kind: RecordKind::Book,
            id,
            message: format!("unknown book status '{other}'"),
        }),
    }
}

fn parse_reservation_status(status: &str, id: String) -> Result<ReservationStatus> {
    match status {
        "Pending" => Ok(ReservationStatus::Pending),
        "Confirmed" => Ok(ReservationStatus::Confirmed),
        "Completed" => Ok(ReservationStatus::Completed),
        "Cancelled" => Ok(ReservationStatus::Cancelled),
        other => Err(LedgerError::InvalidRecord {
            kind: RecordKind::Reservation,
            id,
            message: format!("unknown reservation status '{other}'"),
        }),
    }
}

fn parse_payment_status(status: &str, kind: RecordKind, id: String) -> Result<PaymentStatus> {
    match status {
        "Pending" => Ok(PaymentStatus::Pending),
        "Paid" => Ok(PaymentStatus::Paid),
        "Failed" => Ok(PaymentStatus::Failed),
        "Refunded" => Ok(PaymentStatus::Refunded),
        other => Err(LedgerError::InvalidRecord {
            kind,
            id,
            message: format!("unknown payment status '{other}'"),
        }),
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn book(&self, id: BookId) -> Result<Option<Versioned<Book>>> {
        let row = sqlx::query("SELECT * FROM books WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_book).transpose()
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>> {
        let row = sqlx::query("SELECT * FROM reservations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_reservation).transpose()
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn payment_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Versioned<Payment>>> {
        let row = sqlx::query("SELECT * FROM payments WHERE reservation_id = $1")
            .bind(reservation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<()> {
        tracing::debug!(writes = writes.len(), "committing ledger batch");
        let mut tx = self.pool.begin().await?;
        for write in &writes {
            // An Err return drops the transaction, rolling back the batch.
            Self::apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn active_reservation_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Option<Versioned<Reservation>>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM reservations
            WHERE book_id = $1 AND status IN ('Pending', 'Confirmed')
            LIMIT 1
            "#,
        )
        .bind(book_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_reservation).transpose()
    }

    async fn expired_pending_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM reservations
            WHERE status = 'Pending' AND deadline <= $1
            ORDER BY deadline ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?)))
            .collect()
    }

    async fn reservations_for_buyer(&self, buyer: UserId) -> Result<Vec<Versioned<Reservation>>> {
        let rows = sqlx::query(
            "SELECT * FROM reservations WHERE buyer_id = $1 ORDER BY created_at DESC",
        )
        .bind(buyer.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn reservations_for_owner(&self, owner: UserId) -> Result<Vec<Versioned<Reservation>>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM reservations r
            JOIN books b ON b.id = r.book_id
            WHERE b.owner_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(owner.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}
