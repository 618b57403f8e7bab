//! Inventory ledger of the product service.
//!
//! The ledger owns the true stock count of every product. Stock is taken
//! with an atomic conditional decrement per item ("subtract only if enough
//! is left"), never with read-then-write, so concurrent reservations can
//! never oversell. A reservation that fails part-way gives back what it
//! already took before reporting `InsufficientStock`.
//!
//! Each debit is recorded on the order's [`Reservation`] in the same step
//! that takes the stock, which makes restores exact and safe to
//! redeliver. A reserve that stops part-way leaves a `Pending` record
//! with everything it took. A cancellation gives that back, and a later
//! reserve for the order reclaims it once it has gone stale.

pub mod error;
pub mod handlers;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod service;

pub use error::{LedgerError, Result};
pub use ledger::{Claim, ClaimToken, Released, Reservation, ReservationStatus, StockLedger};
pub use memory::InMemoryStockLedger;
pub use postgres::PostgresStockLedger;
pub use service::{ProductService, ReserveOutcome, RestoreOutcome};
