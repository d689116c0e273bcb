//! Marketplace data model and the reservation state machine.
//!
//! This crate is pure decision logic: it defines the Book, Reservation and
//! Payment records, their status enums, and the single transition function
//! ([`decide`]) that every event source (gateway callback, status poll,
//! expiry sweep) funnels through. No I/O happens here; applying the decided
//! transition and persisting it is the reconcile crate's job.

pub mod book;
pub mod error;
pub mod payment;
pub mod reservation;
pub mod transition;
pub mod value_objects;

pub use book::{Book, BookStatus};
pub use error::DomainError;
pub use payment::Payment;
pub use reservation::{PaymentStatus, Reservation, ReservationKind, ReservationStatus};
pub use transition::{GatewayReport, Transition, decide};
pub use value_objects::{Money, RentalWeeks};
