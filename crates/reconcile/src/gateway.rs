//! Payment gateway capability and in-memory test double.
//!
//! The gateway owns the transaction truth; this service can only observe it
//! by polling. The trait deliberately has no retry logic: a failed call
//! surfaces as [`GatewayError`], and the next poll, callback or sweep tick
//! is the retry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{GatewayReport, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the payment provider boundary. Always infrastructure, never
/// business outcomes — a declined payment is a `Failed` order state, not an
/// error.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout talking to the provider.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// The provider rejected the request outright.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

/// Transaction state as the gateway reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayState {
    /// No terminal outcome yet.
    Pending,

    /// Settled successfully.
    Completed,

    /// Terminally failed (declined, expired at the provider, …).
    Failed,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GatewayState::Pending => "PENDING",
            GatewayState::Completed => "COMPLETED",
            GatewayState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Request to register a new payment order with the gateway.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    /// Amount to collect.
    pub amount: Money,

    /// Where the gateway sends the buyer after the payment attempt.
    pub redirect_url: String,

    /// Order id under which this service will poll later.
    pub merchant_order_id: String,

    /// Free-form metadata forwarded to the provider.
    pub metadata: HashMap<String, String>,
}

/// A successfully created gateway order.
#[derive(Debug, Clone)]
pub struct OrderCreated {
    /// The gateway's own order id.
    pub order_id: String,

    /// Hosted checkout page for the buyer.
    pub payment_url: String,
}

/// Result of polling an order's status.
#[derive(Debug, Clone)]
pub struct OrderStatus {
    /// Current transaction state.
    pub state: GatewayState,

    /// Settled transaction id, when the provider exposes one.
    pub transaction_id: Option<String>,

    /// The provider's raw response, stored opaquely for audit.
    pub raw: serde_json::Value,
}

impl From<&OrderStatus> for GatewayReport {
    fn from(status: &OrderStatus) -> Self {
        match status.state {
            GatewayState::Completed => GatewayReport::Completed {
                transaction_id: status.transaction_id.clone(),
            },
            GatewayState::Failed => GatewayReport::Failed,
            GatewayState::Pending => GatewayReport::Pending,
        }
    }
}

/// Request to return a settled payment to the buyer.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// The original merchant order id.
    pub merchant_order_id: String,

    /// Amount to refund.
    pub amount: Money,

    /// Idempotency key for the refund itself.
    pub refund_id: String,
}

/// Outcome of a refund request.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    /// State the refund entered at the provider.
    pub state: GatewayState,
}

/// Trait for payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payment order and returns the buyer-facing checkout URL.
    async fn create_order(&self, request: CreateOrderRequest)
    -> Result<OrderCreated, GatewayError>;

    /// Polls the current state of an order.
    async fn poll_status(&self, merchant_order_id: &str) -> Result<OrderStatus, GatewayError>;

    /// Requests a refund of a settled payment.
    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError>;
}

#[derive(Debug, Clone)]
struct ScriptedOrder {
    state: GatewayState,
    transaction_id: Option<String>,
    amount: Money,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    orders: HashMap<String, ScriptedOrder>,
    refunds: Vec<RefundRequest>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_poll: bool,
    fail_on_refund: bool,
}

/// Deterministic in-memory gateway for testing.
///
/// Orders start `Pending`; tests script the outcome with
/// [`complete_order`](InMemoryGateway::complete_order) and
/// [`fail_order`](InMemoryGateway::fail_order), and flip the `fail_on_*`
/// switches to simulate provider outages.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to fail order creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the gateway to fail status polls.
    pub fn set_fail_on_poll(&self, fail: bool) {
        self.state.write().unwrap().fail_on_poll = fail;
    }

    /// Configures the gateway to fail refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Scripts a successful settlement for an order.
    pub fn complete_order(&self, merchant_order_id: &str, transaction_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(order) = state.orders.get_mut(merchant_order_id) {
            order.state = GatewayState::Completed;
            order.transaction_id = Some(transaction_id.to_string());
        }
    }

    /// Scripts a terminal failure for an order.
    pub fn fail_order(&self, merchant_order_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(order) = state.orders.get_mut(merchant_order_id) {
            order.state = GatewayState::Failed;
        }
    }

    /// Returns the number of orders created.
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Returns true if an order exists under the given merchant id.
    pub fn has_order(&self, merchant_order_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .orders
            .contains_key(merchant_order_id)
    }

    /// Returns the number of refunds requested.
    pub fn refund_count(&self) -> usize {
        self.state.read().unwrap().refunds.len()
    }

    /// Returns the refunded amount for an order, if a refund was requested.
    pub fn refunded_amount(&self, merchant_order_id: &str) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .refunds
            .iter()
            .find(|r| r.merchant_order_id == merchant_order_id)
            .map(|r| r.amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderCreated, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(GatewayError::Unreachable("connection refused".to_string()));
        }

        state.next_id += 1;
        let order_id = format!("GW-ORD-{:04}", state.next_id);
        let payment_url = format!("https://pay.test/checkout/{}", request.merchant_order_id);
        state.orders.insert(
            request.merchant_order_id,
            ScriptedOrder {
                state: GatewayState::Pending,
                transaction_id: None,
                amount: request.amount,
            },
        );

        Ok(OrderCreated {
            order_id,
            payment_url,
        })
    }

    async fn poll_status(&self, merchant_order_id: &str) -> Result<OrderStatus, GatewayError> {
        let state = self.state.read().unwrap();

        if state.fail_on_poll {
            return Err(GatewayError::Unreachable("poll timed out".to_string()));
        }

        let order = state
            .orders
            .get(merchant_order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {merchant_order_id}")))?;

        Ok(OrderStatus {
            state: order.state,
            transaction_id: order.transaction_id.clone(),
            raw: serde_json::json!({
                "merchantOrderId": merchant_order_id,
                "state": order.state.to_string(),
                "amount": order.amount.paise(),
            }),
        })
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_refund {
            return Err(GatewayError::Unreachable("refund timed out".to_string()));
        }

        if !state.orders.contains_key(&request.merchant_order_id) {
            return Err(GatewayError::Rejected(format!(
                "unknown order {}",
                request.merchant_order_id
            )));
        }

        state.refunds.push(request);
        Ok(RefundOutcome {
            state: GatewayState::Completed,
        })
    }
}
