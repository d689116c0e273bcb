//! Reservation endpoints: reserve, status, collect, cancel, listings.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use common::{BookId, ReservationId, UserId};
use domain::{RentalWeeks, ReservationKind};
use ledger::LedgerStore;
use reconcile::{Orchestrator, PaymentGateway, StatusSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<L: LedgerStore, G: PaymentGateway> {
    pub orchestrator: Arc<Orchestrator<L, G>>,
    pub frontend_url: String,
}

/// Reads the authenticated user id injected by the fronting auth layer.
///
/// Identity is out of scope for this core; the auth proxy resolves the
/// session and forwards a stable numeric id in `X-User-Id`.
pub fn current_user(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .map(UserId::new)
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid X-User-Id header".to_string()))
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReservationRequest {
    pub book_id: String,
    /// `"purchase"` or `"rental"`.
    pub kind: String,
    /// Required for rentals; 1–3.
    pub weeks: Option<u8>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationCreatedResponse {
    pub reservation_id: String,
    pub merchant_order_id: String,
    pub payment_url: String,
    pub amount_paise: i64,
}

#[derive(Serialize)]
pub struct ReservationStatusResponse {
    pub reservation_id: String,
    pub book_id: String,
    pub status: String,
    pub payment_status: String,
    pub kind: String,
    pub weeks: Option<u8>,
    pub fee_paise: i64,
    pub deadline: String,
    pub rental_started_at: Option<String>,
    pub rental_due_at: Option<String>,
    pub is_overdue: bool,
    pub gateway_state: Option<String>,
    pub transaction_id: Option<String>,
}

impl From<StatusSnapshot> for ReservationStatusResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        let (kind, weeks) = match snapshot.kind {
            ReservationKind::Purchase => ("purchase", None),
            ReservationKind::Rental { weeks } => ("rental", Some(weeks.as_u8())),
        };
        Self {
            reservation_id: snapshot.reservation_id.to_string(),
            book_id: snapshot.book_id.to_string(),
            status: snapshot.status.to_string(),
            payment_status: snapshot.payment_status.to_string(),
            kind: kind.to_string(),
            weeks,
            fee_paise: snapshot.fee.paise(),
            deadline: snapshot.deadline.to_rfc3339(),
            rental_started_at: snapshot.rental_started_at.map(|t| t.to_rfc3339()),
            rental_due_at: snapshot.rental_due_at.map(|t| t.to_rfc3339()),
            is_overdue: snapshot.is_overdue,
            gateway_state: snapshot.gateway_state.map(|s| s.to_string()),
            transaction_id: snapshot.transaction_id,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

// -- Handlers --

/// POST /reservations — reserve a book and get the payment URL.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(axum::http::StatusCode, Json<ReservationCreatedResponse>), ApiError> {
    let buyer = current_user(&headers)?;
    let book_id = parse_book_id(&req.book_id)?;
    let kind = parse_kind(&req)?;

    let ticket = state.orchestrator.reserve(book_id, buyer, kind).await?;

    let response = ReservationCreatedResponse {
        reservation_id: ticket.reservation_id.to_string(),
        merchant_order_id: ticket.merchant_order_id,
        payment_url: ticket.payment_url,
        amount_paise: ticket.amount.paise(),
    };
    Ok((axum::http::StatusCode::CREATED, Json(response)))
}

/// GET /reservations/{id}/status — poll-and-report a reservation.
#[tracing::instrument(skip(state, headers))]
pub async fn status<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReservationStatusResponse>, ApiError> {
    let requester = current_user(&headers)?;
    let reservation_id = parse_reservation_id(&id)?;

    let snapshot = state
        .orchestrator
        .check_status(reservation_id, requester)
        .await?;
    Ok(Json(snapshot.into()))
}

/// POST /reservations/{id}/collected — owner records the handover.
#[tracing::instrument(skip(state, headers))]
pub async fn collected<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let owner = current_user(&headers)?;
    let reservation_id = parse_reservation_id(&id)?;

    state
        .orchestrator
        .mark_collected(reservation_id, owner)
        .await?;
    Ok(Json(MessageResponse {
        message: "book marked as collected",
    }))
}

/// POST /reservations/{id}/cancel — buyer withdraws.
#[tracing::instrument(skip(state, headers))]
pub async fn cancel<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let requester = current_user(&headers)?;
    let reservation_id = parse_reservation_id(&id)?;

    state.orchestrator.cancel(reservation_id, requester).await?;
    Ok(Json(MessageResponse {
        message: "reservation cancelled",
    }))
}

/// GET /reservations/my — the caller's reservations, newest first.
#[tracing::instrument(skip(state, headers))]
pub async fn mine<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReservationStatusResponse>>, ApiError> {
    let buyer = current_user(&headers)?;
    let snapshots = state.orchestrator.reservations_for_buyer(buyer).await?;
    Ok(Json(snapshots.into_iter().map(Into::into).collect()))
}

/// GET /reservations/for-my-books — reservations against the caller's
/// listings, newest first.
#[tracing::instrument(skip(state, headers))]
pub async fn for_my_books<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReservationStatusResponse>>, ApiError> {
    let owner = current_user(&headers)?;
    let snapshots = state.orchestrator.reservations_for_owner(owner).await?;
    Ok(Json(snapshots.into_iter().map(Into::into).collect()))
}

fn parse_kind(req: &CreateReservationRequest) -> Result<ReservationKind, ApiError> {
    match req.kind.as_str() {
        "purchase" => Ok(ReservationKind::Purchase),
        "rental" => {
            let weeks = req.weeks.ok_or_else(|| {
                ApiError::BadRequest("rental reservations require 'weeks'".to_string())
            })?;
            let weeks =
                RentalWeeks::new(weeks).map_err(|e| ApiError::BadRequest(e.to_string()))?;
            Ok(ReservationKind::Rental { weeks })
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown reservation kind '{other}'"
        ))),
    }
}

fn parse_book_id(id: &str) -> Result<BookId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid book_id: {e}")))?;
    Ok(BookId::from_uuid(uuid))
}

fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))?;
    Ok(ReservationId::from_uuid(uuid))
}
