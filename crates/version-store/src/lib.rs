//! Version store: the optimistic-concurrency primitive shared by every service.
//!
//! Each persisted aggregate carries a [`Version`]. Writes supply the version
//! they read; the store applies them only if that version is still current and
//! bumps it by exactly one. There are no locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;
pub mod version;

pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use memory::InMemoryVersionStore;
pub use postgres::{PostgresVersionStore, run_migrations};
pub use record::{ProjectionOutcome, Versioned};
pub use store::{VersionStore, VersionStoreExt};
pub use version::Version;
