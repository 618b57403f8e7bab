use async_trait::async_trait;

use crate::{AggregateId, ProjectionOutcome, Result, StoreError, Version, Versioned};

/// Storage for one collection of versioned aggregates.
///
/// All implementations must be thread-safe and perform every write as a single
/// conditional operation: a write never observes one version and commits
/// against another.
#[async_trait]
pub trait VersionStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Returns the collection name (e.g. "orders", "carts").
    fn collection(&self) -> &str;

    /// Inserts a new aggregate at [`Version::first`].
    ///
    /// Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, id: AggregateId, data: T) -> Result<Versioned<T>>;

    /// Loads an aggregate, or None if it does not exist.
    async fn get(&self, id: AggregateId) -> Result<Option<Versioned<T>>>;

    /// Replaces an aggregate's state if its stored version equals `expected`.
    ///
    /// On success the version is `expected.next()`. A stale `expected` fails
    /// with `ConcurrencyConflict` and leaves the stored state untouched.
    async fn update(&self, id: AggregateId, expected: Version, data: T) -> Result<Versioned<T>>;

    /// Upserts a replica of another service's aggregate.
    ///
    /// The record takes the source's version and is written only if that
    /// version is newer than the one held, so redelivered or reordered
    /// snapshots are harmless.
    async fn project(
        &self,
        id: AggregateId,
        source_version: Version,
        data: T,
    ) -> Result<ProjectionOutcome>;

    /// Returns every aggregate in the collection.
    async fn list(&self) -> Result<Vec<Versioned<T>>>;

    /// Removes every aggregate in the collection.
    async fn clear(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for version stores.
#[async_trait]
pub trait VersionStoreExt<T>: VersionStore<T>
where
    T: Send + Sync + 'static,
{
    /// Loads an aggregate, failing with `NotFound` if it does not exist.
    async fn get_required(&self, id: AggregateId) -> Result<Versioned<T>> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Checks if an aggregate exists.
    async fn exists(&self, id: AggregateId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }
}

impl<T, S> VersionStoreExt<T> for S
where
    T: Send + Sync + 'static,
    S: VersionStore<T> + ?Sized,
{
}
