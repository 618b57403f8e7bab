//! Product aggregate, owned by the inventory service.

use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Aggregate, Money};

/// Errors that can occur when editing or debiting a product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("Product title must not be empty")]
    EmptyTitle,

    #[error("Product price must not be negative: {0}")]
    NegativePrice(Money),

    #[error("Quantity must be positive")]
    InvalidQuantity,

    /// Not enough stock to satisfy the request.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: AggregateId,
        requested: u32,
        available: u32,
    },
}

/// A product and its true stock count.
///
/// `quantity` is the single source of truth for available stock and never
/// goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: AggregateId,
    title: String,
    price: Money,
    quantity: u32,
}

impl Aggregate for Product {
    type Error = ProductError;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> AggregateId {
        self.id
    }
}

impl Product {
    /// Creates a product after validating its fields.
    pub fn new(
        id: AggregateId,
        title: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Result<Self, ProductError> {
        let title = title.into();
        Self::validate(&title, price)?;
        Ok(Self {
            id,
            title,
            price,
            quantity,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Returns the product with owner-edited fields.
    pub fn edit(
        &self,
        title: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Result<Self, ProductError> {
        Self::new(self.id, title, price, quantity)
    }

    /// Returns the product with `requested` units taken out of stock.
    pub fn debit(&self, requested: u32) -> Result<Self, ProductError> {
        if requested == 0 {
            return Err(ProductError::InvalidQuantity);
        }
        let quantity =
            self.quantity
                .checked_sub(requested)
                .ok_or(ProductError::InsufficientStock {
                    product_id: self.id,
                    requested,
                    available: self.quantity,
                })?;
        Ok(Self {
            quantity,
            ..self.clone()
        })
    }

    /// Returns the product with `amount` units put back into stock.
    pub fn credit(&self, amount: u32) -> Self {
        Self {
            quantity: self.quantity.saturating_add(amount),
            ..self.clone()
        }
    }

    fn validate(title: &str, price: Money) -> Result<(), ProductError> {
        if title.trim().is_empty() {
            return Err(ProductError::EmptyTitle);
        }
        if price.is_negative() {
            return Err(ProductError::NegativePrice(price));
        }
        Ok(())
    }
}
