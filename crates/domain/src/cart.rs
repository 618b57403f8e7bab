//! Cart aggregate, one per user.

use std::collections::BTreeMap;

use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Aggregate, LineItem};

/// Errors that can occur on cart commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Cart is empty")]
    Empty,
}

/// A user's cart: product id to requested quantity.
///
/// The cart's aggregate id is derived from the user's id, see
/// [`UserId::cart_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    user_id: UserId,
    items: BTreeMap<AggregateId, u32>,
}

impl Aggregate for Cart {
    type Error = CartError;

    fn aggregate_type() -> &'static str {
        "Cart"
    }

    fn id(&self) -> AggregateId {
        self.user_id.cart_id()
    }
}

impl Cart {
    /// Creates an empty cart for the user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: BTreeMap::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn quantity_of(&self, product_id: AggregateId) -> Option<u32> {
        self.items.get(&product_id).copied()
    }

    /// Returns the items in product id order.
    pub fn items(&self) -> Vec<LineItem> {
        self.items
            .iter()
            .map(|(product_id, quantity)| LineItem::new(*product_id, *quantity))
            .collect()
    }

    /// Returns the cart with the product's quantity overwritten.
    ///
    /// A quantity of zero removes the product.
    pub fn with_item(&self, product_id: AggregateId, quantity: u32) -> Self {
        let mut next = self.clone();
        if quantity == 0 {
            next.items.remove(&product_id);
        } else {
            next.items.insert(product_id, quantity);
        }
        next
    }

    /// Returns the cart without the given products, or None if none of them are in it.
    pub fn without(&self, product_ids: &[AggregateId]) -> Option<Self> {
        if !product_ids.iter().any(|id| self.items.contains_key(id)) {
            return None;
        }
        let mut next = self.clone();
        for id in product_ids {
            next.items.remove(id);
        }
        Some(next)
    }

    /// Returns an empty cart for the same user.
    pub fn cleared(&self) -> Self {
        Self::new(self.user_id)
    }

    /// Fails with [`CartError::Empty`] if there is nothing to check out.
    pub fn ensure_not_empty(&self) -> Result<(), CartError> {
        if self.is_empty() {
            return Err(CartError::Empty);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_id_is_user_id() {
        let user = UserId::new();
        let cart = Cart::new(user);
        assert_eq!(cart.id().as_uuid(), user.as_uuid());
    }

    #[test]
    fn with_item_overwrites_quantity() {
        let product = AggregateId::new();
        let cart = Cart::new(UserId::new())
            .with_item(product, 2)
            .with_item(product, 5);

        assert_eq!(cart.quantity_of(product), Some(5));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn zero_quantity_removes() {
        let product = AggregateId::new();
        let cart = Cart::new(UserId::new())
            .with_item(product, 2)
            .with_item(product, 0);

        assert!(cart.is_empty());
        assert_eq!(cart.ensure_not_empty(), Err(CartError::Empty));
    }

    #[test]
    fn without_removes_only_listed_products() {
        let (a, b, c) = (AggregateId::new(), AggregateId::new(), AggregateId::new());
        let cart = Cart::new(UserId::new()).with_item(a, 1).with_item(b, 2);

        let next = cart.without(&[a, c]).unwrap();
        assert_eq!(next.quantity_of(a), None);
        assert_eq!(next.quantity_of(b), Some(2));

        assert!(next.without(&[c]).is_none());
    }
}
