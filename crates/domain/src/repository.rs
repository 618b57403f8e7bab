//! Read-modify-write over a version store.

use std::sync::Arc;

use common::AggregateId;
use version_store::{StoreError, Version, VersionStore, Versioned};

use crate::aggregate::Aggregate;
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult<A> {
    /// The aggregate after the command.
    pub aggregate: A,

    /// The aggregate's version after the command.
    pub version: Version,

    /// False if the command was a no-op and nothing was written.
    pub changed: bool,
}

/// Loads aggregates, runs commands against them and writes the result back
/// with the version that was read.
///
/// A command is a function from the current state to `Some(next state)`, or
/// `None` when there is nothing to change. Nothing is written if the command
/// fails.
pub struct Repository<A: Aggregate> {
    store: Arc<dyn VersionStore<A>>,
}

impl<A: Aggregate> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<A: Aggregate> Repository<A> {
    /// Creates a new repository over the given store.
    pub fn new(store: Arc<dyn VersionStore<A>>) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &Arc<dyn VersionStore<A>> {
        &self.store
    }

    /// Persists a new aggregate at the first version.
    pub async fn create(&self, aggregate: A) -> Result<Versioned<A>, DomainError> {
        Ok(self.store.insert(aggregate.id(), aggregate).await?)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load(&self, id: AggregateId) -> Result<Option<Versioned<A>>, DomainError> {
        Ok(self.store.get(id).await?)
    }

    /// Loads an aggregate, failing with `NotFound` if it doesn't exist.
    pub async fn load_required(&self, id: AggregateId) -> Result<Versioned<A>, DomainError> {
        self.load(id).await?.ok_or(DomainError::NotFound {
            aggregate_type: A::aggregate_type(),
            aggregate_id: id,
        })
    }

    /// Runs a command once against the current state.
    ///
    /// Fails with `ConcurrencyConflict` if another writer got in between
    /// the read and the write.
    pub async fn execute<F>(&self, id: AggregateId, command: F) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Option<A>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current = self.load_required(id).await?;

        match command(&current.data)? {
            None => Ok(CommandResult {
                aggregate: current.data,
                version: current.version,
                changed: false,
            }),
            Some(next) => {
                let saved = self.store.update(id, current.version, next).await?;
                Ok(CommandResult {
                    aggregate: saved.data,
                    version: saved.version,
                    changed: true,
                })
            }
        }
    }

    /// Runs a command, re-reading and re-running it on `ConcurrencyConflict`.
    ///
    /// Only for commands that are safe to recompute against newer state.
    /// Gives up after `attempts` tries and returns the last conflict.
    pub async fn execute_with_retry<F>(
        &self,
        id: AggregateId,
        attempts: u32,
        mut command: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnMut(&A) -> Result<Option<A>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 1;
        loop {
            match self.execute(id, &mut command).await {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    tracing::debug!(
                        aggregate_type = A::aggregate_type(),
                        aggregate_id = %id,
                        attempt,
                        "version conflict, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but runs the
    /// command against `initial()` and inserts the result if the aggregate
    /// does not exist yet.
    pub async fn upsert_with_retry<I, F>(
        &self,
        id: AggregateId,
        attempts: u32,
        initial: I,
        mut command: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        I: Fn() -> A,
        F: FnMut(&A) -> Result<Option<A>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 1;
        loop {
            let result = match self.load(id).await? {
                Some(_) => self.execute(id, &mut command).await,
                None => {
                    let fresh = initial();
                    match command(&fresh)? {
                        None => Ok(CommandResult {
                            aggregate: fresh,
                            version: Version::initial(),
                            changed: false,
                        }),
                        Some(next) => match self.store.insert(id, next).await {
                            Ok(saved) => Ok(CommandResult {
                                aggregate: saved.data,
                                version: saved.version,
                                changed: true,
                            }),
                            // Someone created it first; go around again as an update.
                            Err(StoreError::AlreadyExists(_)) if attempt < attempts => {
                                attempt += 1;
                                continue;
                            }
                            Err(e) => Err(e.into()),
                        },
                    }
                }
            };

            match result {
                Err(e) if e.is_conflict() && attempt < attempts => attempt += 1,
                result => return result,
            }
        }
    }
}
