//! Entity trait: identity + version for optimistic concurrency.

use core::fmt::{Debug, Display};
use core::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Key type a repository can index documents by.
///
/// `Ord` gives list queries their deterministic tiebreaker; `Serialize` lets
/// backends store the key next to the document.
pub trait EntityKey:
    Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> EntityKey for K where
    K: Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A record persisted through a [`Repository`](crate::Repository).
///
/// # Invariants
/// - `key()` never changes for the lifetime of the record.
/// - The stored version grows by exactly 1 per successful update; the
///   repository is the only writer of the version.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: EntityKey;

    fn key(&self) -> &Self::Key;

    /// Version observed when this copy was read.
    fn version(&self) -> u64;

    /// Returns a copy carrying `version`.
    fn with_version(self, version: u64) -> Self;
}
