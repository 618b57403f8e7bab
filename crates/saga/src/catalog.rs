//! Product lookups for the cart service.

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, ProductSnapshot};
use inventory::ProductService;
use projections::ProductReplicaView;
use version_store::Versioned;

use crate::Result;

/// Where the cart service gets product data from.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the current snapshot of a product, or None if it does not exist.
    async fn snapshot(&self, product_id: AggregateId) -> Result<Option<ProductSnapshot>>;
}

/// Reads the local product replica and falls back to the product service
/// on a miss, filling the replica with what it found.
///
/// The replica can lag behind stock changes. Checkout uses it for advisory
/// checks only; the reservation at payment time is authoritative.
#[derive(Clone)]
pub struct ReadThroughCatalog {
    replica: ProductReplicaView,
    products: ProductService,
}

impl ReadThroughCatalog {
    pub fn new(replica: ProductReplicaView, products: ProductService) -> Self {
        Self { replica, products }
    }
}

#[async_trait]
impl ProductCatalog for ReadThroughCatalog {
    async fn snapshot(&self, product_id: AggregateId) -> Result<Option<ProductSnapshot>> {
        if let Some(held) = self.replica.get(product_id).await? {
            return Ok(Some(held.data));
        }

        let Some(product) = self.products.product(product_id).await? else {
            return Ok(None);
        };

        tracing::debug!(%product_id, version = %product.version, "product replica miss, read through");
        let snapshot = to_snapshot(&product);
        self.replica.remember(snapshot.clone(), product.version).await?;
        Ok(Some(snapshot))
    }
}

fn to_snapshot(product: &Versioned<domain::Product>) -> ProductSnapshot {
    ProductSnapshot {
        product_id: product.data.id(),
        title: product.data.title().to_string(),
        price: product.data.price(),
        quantity: product.data.quantity(),
    }
}
