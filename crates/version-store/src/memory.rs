use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, ProjectionOutcome, Result, StoreError, Version, Versioned, store::VersionStore,
};

/// In-memory version store.
///
/// Every write holds the collection's write lock for the whole
/// compare-and-increment, which makes it atomic with respect to other writers.
pub struct InMemoryVersionStore<T> {
    collection: String,
    records: Arc<RwLock<HashMap<AggregateId, Versioned<T>>>>,
}

impl<T> Clone for InMemoryVersionStore<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            records: Arc::clone(&self.records),
        }
    }
}

impl<T> InMemoryVersionStore<T> {
    /// Creates a new empty store for the named collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the number of stored aggregates.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<T> VersionStore<T> for InMemoryVersionStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, id: AggregateId, data: T) -> Result<Versioned<T>> {
        let mut records = self.records.write().await;
        if records.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let record = Versioned::new(id, Version::first(), data);
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: AggregateId) -> Result<Option<Versioned<T>>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, id: AggregateId, expected: Version, data: T) -> Result<Versioned<T>> {
        let mut records = self.records.write().await;
        let current = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if current.version != expected {
            metrics::counter!("version_store_conflicts_total", "collection" => self.collection.clone())
                .increment(1);
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: id,
                expected,
                actual: current.version,
            });
        }

        current.version = expected.next();
        current.updated_at = Utc::now();
        current.data = data;
        Ok(current.clone())
    }

    async fn project(
        &self,
        id: AggregateId,
        source_version: Version,
        data: T,
    ) -> Result<ProjectionOutcome> {
        let mut records = self.records.write().await;
        if let Some(current) = records.get(&id)
            && current.version >= source_version
        {
            return Ok(ProjectionOutcome::Stale {
                held: current.version,
            });
        }

        records.insert(id, Versioned::new(id, source_version, data));
        Ok(ProjectionOutcome::Applied(source_version))
    }

    async fn list(&self) -> Result<Vec<Versioned<T>>> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|r| r.updated_at);
        Ok(all)
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VersionStoreExt;

    fn store() -> InMemoryVersionStore<String> {
        InMemoryVersionStore::new("test")
    }

    #[tokio::test]
    async fn insert_starts_at_first_version() {
        let store = store();
        let id = AggregateId::new();

        let record = store.insert(id, "a".to_string()).await.unwrap();
        assert_eq!(record.version, Version::first());
        assert_eq!(store.get_required(id).await.unwrap().data, "a");
    }

    #[tokio::test]
    async fn insert_twice_is_rejected() {
        let store = store();
        let id = AggregateId::new();
        store.insert(id, "a".to_string()).await.unwrap();

        let result = store.insert(id, "b".to_string()).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
        assert_eq!(store.get_required(id).await.unwrap().data, "a");
    }

    #[tokio::test]
    async fn n_writes_advance_version_by_n() {
        let store = store();
        let id = AggregateId::new();
        let mut record = store.insert(id, "v".to_string()).await.unwrap();

        for i in 0..5 {
            record = store
                .update(id, record.version, format!("v{i}"))
                .await
                .unwrap();
        }

        assert_eq!(record.version, Version::new(6));
        assert_eq!(store.get_required(id).await.unwrap().version, Version::new(6));
    }

    #[tokio::test]
    async fn stale_write_is_rejected_without_mutation() {
        let store = store();
        let id = AggregateId::new();
        store.insert(id, "original".to_string()).await.unwrap();
        store
            .update(id, Version::first(), "second".to_string())
            .await
            .unwrap();

        let result = store
            .update(id, Version::first(), "stale".to_string())
            .await;

        match result {
            Err(StoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::first());
                assert_eq!(actual, Version::new(2));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let stored = store.get_required(id).await.unwrap();
        assert_eq!(stored.data, "second");
        assert_eq!(stored.version, Version::new(2));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = store();
        let result = store
            .update(AggregateId::new(), Version::first(), "x".to_string())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_writers_on_same_version_one_wins() {
        let store = store();
        let id = AggregateId::new();
        store.insert(id, "start".to_string()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update(id, Version::first(), format!("writer-{i}")).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.get_required(id).await.unwrap().version, Version::new(2));
    }

    #[tokio::test]
    async fn project_applies_only_newer_versions() {
        let store = store();
        let id = AggregateId::new();

        let outcome = store.project(id, Version::new(3), "v3".into()).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::Applied(Version::new(3)));

        let outcome = store.project(id, Version::new(2), "v2".into()).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::Stale { held: Version::new(3) });

        let outcome = store.project(id, Version::new(3), "v3-again".into()).await.unwrap();
        assert!(!outcome.is_applied());

        store.project(id, Version::new(5), "v5".into()).await.unwrap();
        let stored = store.get_required(id).await.unwrap();
        assert_eq!(stored.version, Version::new(5));
        assert_eq!(stored.data, "v5");
    }

    #[tokio::test]
    async fn clear_empties_collection() {
        let store = store();
        store.insert(AggregateId::new(), "a".into()).await.unwrap();
        store.insert(AggregateId::new(), "b".into()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
    }
}
