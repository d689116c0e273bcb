//! Inbound gateway callback endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use common::ReservationId;
use ledger::LedgerStore;
use reconcile::{PaymentGateway, RedirectTarget};
use serde::Deserialize;

use super::reservations::AppState;

#[derive(Deserialize)]
pub struct CallbackParams {
    pub reservation_id: Option<String>,
}

/// GET /payments/callback — where the gateway sends the buyer's browser
/// after a payment attempt.
///
/// Unauthenticated by nature, so every field except `reservation_id` is
/// ignored and truth is re-derived by polling the gateway. This endpoint
/// never errors: anything unexpected redirects to the generic failure page.
#[tracing::instrument(skip(state, params))]
pub async fn callback<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<L, G>>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    metrics::counter!("callback_requests_total").increment(1);

    let target = match params
        .reservation_id
        .as_deref()
        .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
    {
        Some(uuid) => {
            state
                .orchestrator
                .handle_callback(ReservationId::from_uuid(uuid))
                .await
        }
        None => {
            tracing::warn!("callback without a usable reservation_id");
            RedirectTarget::Failure(None)
        }
    };

    Redirect::to(&redirect_url(&state.frontend_url, target))
}

fn redirect_url(frontend: &str, target: RedirectTarget) -> String {
    match target.reservation_id() {
        Some(id) => format!("{frontend}/{}?reservation_id={id}", target.page()),
        None => format!("{frontend}/{}", target.page()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_url_with_reservation() {
        let id = ReservationId::new();
        let url = redirect_url("http://localhost:3000", RedirectTarget::Success(id));
        assert_eq!(
            url,
            format!("http://localhost:3000/payment-success?reservation_id={id}")
        );
    }

    #[test]
    fn test_redirect_url_generic_failure() {
        let url = redirect_url("http://localhost:3000", RedirectTarget::Failure(None));
        assert_eq!(url, "http://localhost:3000/payment-failed");
    }
}
