pub mod types;

pub use types::{BookId, PaymentId, ReservationId, UserId};
