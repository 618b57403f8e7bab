//! Product replica, kept current from `product.updated`.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::messages::topics;
use domain::{ProductSnapshot, ProductUpdated};
use event_bus::EventEnvelope;
use tokio::sync::RwLock;
use version_store::{ProjectionOutcome, Version, VersionStore, Versioned};

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};

/// A service's local copy of the product catalog.
///
/// Snapshots are absolute and carry the product's version, so a redelivered
/// or reordered `product.updated` never moves the replica backwards.
#[derive(Clone)]
pub struct ProductReplicaView {
    name: &'static str,
    store: Arc<dyn VersionStore<ProductSnapshot>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl ProductReplicaView {
    /// Creates a view over `store`, consuming as group `name`.
    pub fn new(name: &'static str, store: Arc<dyn VersionStore<ProductSnapshot>>) -> Self {
        Self {
            name,
            store,
            position: Arc::new(RwLock::new(ProjectionPosition::default())),
        }
    }

    /// Gets the snapshot of a product, if one has been seen.
    pub async fn get(&self, product_id: AggregateId) -> Result<Option<Versioned<ProductSnapshot>>> {
        Ok(self.store.get(product_id).await?)
    }

    /// Gets every snapshot held.
    pub async fn all(&self) -> Result<Vec<Versioned<ProductSnapshot>>> {
        Ok(self.store.list().await?)
    }

    /// Stores a snapshot read from the owning service.
    pub async fn remember(&self, snapshot: ProductSnapshot, version: Version) -> Result<ProjectionOutcome> {
        Ok(self.store.project(snapshot.product_id, version, snapshot).await?)
    }
}

#[async_trait]
impl Projection for ProductReplicaView {
    fn name(&self) -> &'static str {
        self.name
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::PRODUCT_UPDATED]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let update: ProductUpdated = event.decode()?;
        let snapshot = ProductSnapshot {
            product_id: update.product_id,
            title: update.title,
            price: update.price,
            quantity: update.quantity,
        };

        if let ProjectionOutcome::Stale { held } = self.remember(snapshot, update.version).await? {
            tracing::debug!(
                replica = self.name,
                product_id = %update.product_id,
                version = %update.version,
                %held,
                "ignoring stale product snapshot"
            );
        }

        let mut pos = self.position.write().await;
        *pos = pos.record(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear().await?;
        *self.position.write().await = ProjectionPosition::default();
        Ok(())
    }
}
