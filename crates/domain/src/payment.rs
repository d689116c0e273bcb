//! Payment record mirroring the gateway-side order.

use chrono::{DateTime, Utc};
use common::{PaymentId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::reservation::{PaymentStatus, Reservation};
use crate::value_objects::Money;

/// The canonical settlement record for a reservation (1:1).
///
/// Created in the same atomic write as its parent reservation. Its `status`
/// is what every inbound event checks first: once it leaves `Pending`, the
/// authoritative outcome has been recorded and later events are no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: PaymentId,

    /// Parent reservation.
    pub reservation_id: ReservationId,

    /// Order id this service registered with the gateway.
    pub merchant_order_id: String,

    /// Order id the gateway assigned, once the order exists there.
    pub gateway_order_id: Option<String>,

    /// Gateway transaction id; set only when the payment settles.
    pub transaction_id: Option<String>,

    /// Amount charged.
    pub amount: Money,

    /// ISO currency code.
    pub currency: String,

    /// Settlement state.
    pub status: PaymentStatus,

    /// Raw gateway response, kept verbatim for audit and debugging.
    /// Never re-parsed by business logic after initial extraction.
    pub gateway_response: Option<serde_json::Value>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Currency every marketplace payment settles in.
    pub const CURRENCY: &'static str = "INR";

    /// Creates the pending payment record for a freshly opened reservation.
    pub fn for_reservation(
        reservation: &Reservation,
        merchant_order_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            reservation_id: reservation.id,
            merchant_order_id: merchant_order_id.into(),
            gateway_order_id: None,
            transaction_id: None,
            amount: reservation.fee,
            currency: Self::CURRENCY.to_string(),
            status: PaymentStatus::Pending,
            gateway_response: None,
            created_at: now,
        }
    }

    /// Records a successful settlement.
    pub fn mark_paid(
        &mut self,
        transaction_id: Option<String>,
        gateway_response: Option<serde_json::Value>,
    ) {
        self.status = PaymentStatus::Paid;
        self.transaction_id = transaction_id;
        if gateway_response.is_some() {
            self.gateway_response = gateway_response;
        }
    }

    /// Records a failed or expired payment.
    pub fn mark_failed(&mut self, gateway_response: Option<serde_json::Value>) {
        self.status = PaymentStatus::Failed;
        if gateway_response.is_some() {
            self.gateway_response = gateway_response;
        }
    }

    /// Records that the settled amount was returned to the buyer.
    pub fn mark_refunded(&mut self) {
        self.status = PaymentStatus::Refunded;
    }
}
