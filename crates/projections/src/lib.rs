//! Replica projections.
//!
//! Each service keeps an eventually-consistent copy of the data it reads
//! but does not own:
//! - [`ProductReplicaView`]: products as last announced on `product.updated`
//! - [`OrderReplicaView`]: the payment service's copy of orders
//!
//! The [`ProjectionProcessor`] drives projections from the bus, one
//! consumer group per projection, and can rebuild them by replaying topics.

pub mod error;
pub mod processor;
pub mod projection;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use views::{OrderReplicaView, ProductReplicaView};
