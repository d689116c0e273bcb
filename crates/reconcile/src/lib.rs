//! Reservation and payment reconciliation engine.
//!
//! This crate coordinates three independent truths that can disagree at any
//! instant: the book's availability, the reservation's lifecycle, and the
//! state of a transaction owned by an external, partially-observable payment
//! gateway. Synchronous API calls, unauthenticated gateway callbacks and the
//! periodic expiry sweeper all funnel into one transition path on the
//! [`Orchestrator`]; per-reservation safety comes from optimistic ledger
//! writes plus terminal-state immutability, never from locks.

pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod sweeper;

pub use error::ReconcileError;
pub use gateway::{
    CreateOrderRequest, GatewayError, GatewayState, InMemoryGateway, OrderCreated, OrderStatus,
    PaymentGateway, RefundOutcome, RefundRequest,
};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, RedirectTarget, ReservationTicket, StatusSnapshot,
};
pub use sweeper::{SweepStats, Sweeper};
