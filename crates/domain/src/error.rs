//! Domain error types.

use common::AggregateId;
use thiserror::Error;
use version_store::StoreError;

use crate::{CartError, OrderError, ProductError};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the version store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Product error: {0}")]
    Product(#[from] ProductError),

    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Aggregate not found.
    #[error("{aggregate_type} not found: {aggregate_id}")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },
}

impl DomainError {
    /// Returns true for a stale-version rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Store(e) if e.is_conflict())
    }
}

impl From<std::convert::Infallible> for DomainError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}
