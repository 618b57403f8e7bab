use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// An aggregate's state together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The aggregate identifier.
    pub id: AggregateId,

    /// Revision of `data`. Supply it back on update.
    pub version: Version,

    /// When this revision was written.
    pub updated_at: DateTime<Utc>,

    /// The aggregate state.
    pub data: T,
}

impl<T> Versioned<T> {
    /// Creates a record at the given version, stamped now.
    pub fn new(id: AggregateId, version: Version, data: T) -> Self {
        Self {
            id,
            version,
            updated_at: Utc::now(),
            data,
        }
    }

    /// Maps the state, keeping id and version.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            id: self.id,
            version: self.version,
            updated_at: self.updated_at,
            data: f(self.data),
        }
    }
}

/// Result of an absolute-value replica write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The write was newer and is now stored.
    Applied(Version),

    /// The store already held this or a newer version; nothing changed.
    Stale { held: Version },
}

impl ProjectionOutcome {
    /// Returns true if the write changed the stored state.
    pub fn is_applied(&self) -> bool {
        matches!(self, ProjectionOutcome::Applied(_))
    }
}
