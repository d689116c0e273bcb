//! Durable record store for the marketplace core.
//!
//! The ledger holds one row per Book, Reservation and Payment, each carrying
//! an optimistic version token. All mutation goes through [`LedgerStore::commit`],
//! which applies a batch of conditional writes atomically: every write names
//! the version it expects, and the whole batch fails with
//! [`LedgerError::VersionConflict`] if any expectation is stale. That single
//! primitive is what makes callback replays, poll/callback races and
//! concurrent reserve attempts safe without cross-record locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::{Expected, LedgerStore, RecordKind, Version, Versioned, Write};
