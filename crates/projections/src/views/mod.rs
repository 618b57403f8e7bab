//! Replica views owned by the consuming services.

pub mod order_replica;
pub mod product_replica;

pub use order_replica::OrderReplicaView;
pub use product_replica::ProductReplicaView;
