//! Shared identifier types for the storefront services.

mod types;

pub use types::{AggregateId, UserId};
