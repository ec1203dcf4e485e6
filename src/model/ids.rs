//! Monotonic newtype identifiers for queue entities.
//!
//! Each id type follows the same shape: a transparent `i64` wrapper,
//! `Copy`, orderable, serializable, and allocated from an `AtomicI64`
//! counter scoped to the engine.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw id value, e.g. when reading it back from a snapshot.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// The raw integer id.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(NzbId, "Identifier for an [`crate::model::NzbInfo`], unique across queue + history.");
id_type!(FileId, "Identifier for a [`crate::model::FileInfo`], unique for the session.");
id_type!(ArticleId, "Identifier for an [`crate::model::ArticleInfo`].");
id_type!(ServerId, "Identifier for a configured [`crate::model::NewsServer`].");

/// Allocates monotonically increasing ids for one entity type.
///
/// Kept separate per entity (rather than one global counter) so that
/// restoring a snapshot can seed each counter independently from the
/// highest id observed for that entity.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl IdAllocator {
    /// Create an allocator that will hand out `start` as its first id.
    pub fn starting_at(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Ensure future allocations are strictly greater than `observed`,
    /// used when restoring a snapshot that already contains higher ids.
    pub fn observe(&self, observed: i64) {
        self.next.fetch_max(observed + 1, Ordering::Relaxed);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
