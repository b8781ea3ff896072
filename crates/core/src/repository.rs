//! Generic data-access contract with optimistic concurrency.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::{RepositoryError, RepositoryResult};
use crate::filter::DocumentFilter;
use crate::pagination::{Metadata, PageRequest};

/// Ceiling applied to every repository call unless a backend is configured
/// otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Data access for one collection of `T`.
///
/// ## Optimistic concurrency
///
/// `update` writes only if the stored version still equals `entity.version()`
/// and stores `version + 1`. When nothing matches (stale version, wrong key,
/// concurrent delete) it fails with [`RepositoryError::EditConflict`]; callers
/// re-fetch and retry instead of overwriting.
///
/// ## Deadlines and cancellation
///
/// Implementations bound each call by a per-call timeout
/// ([`RepositoryError::Timeout`]). Dropping the returned future cancels the
/// call, which is how a disconnected client stops its storage work.
///
/// ## Listing
///
/// `list` fetches the page and counts matches with two independent reads. Under
/// concurrent writes the metadata and the page may disagree slightly.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get_by_key(&self, key: &T::Key) -> RepositoryResult<T>;

    /// First match in key order.
    async fn get_by_filter(&self, filter: &DocumentFilter) -> RepositoryResult<T>;

    /// Callers must have validated `page` (see [`PageRequest::validate`]).
    async fn list(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> RepositoryResult<(Vec<T>, Metadata)>;

    async fn create(&self, entity: T) -> RepositoryResult<T::Key>;

    /// Returns the stored entity carrying its new version.
    async fn update(&self, entity: &T) -> RepositoryResult<T>;

    async fn delete(&self, key: &T::Key) -> RepositoryResult<()>;
}

#[async_trait]
impl<T, R> Repository<T> for Arc<R>
where
    T: Entity,
    R: Repository<T> + ?Sized,
{
    async fn get_by_key(&self, key: &T::Key) -> RepositoryResult<T> {
        (**self).get_by_key(key).await
    }

    async fn get_by_filter(&self, filter: &DocumentFilter) -> RepositoryResult<T> {
        (**self).get_by_filter(filter).await
    }

    async fn list(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> RepositoryResult<(Vec<T>, Metadata)> {
        (**self).list(filter, page).await
    }

    async fn create(&self, entity: T) -> RepositoryResult<T::Key> {
        (**self).create(entity).await
    }

    async fn update(&self, entity: &T) -> RepositoryResult<T> {
        (**self).update(entity).await
    }

    async fn delete(&self, key: &T::Key) -> RepositoryResult<()> {
        (**self).delete(key).await
    }
}

/// Run `fut` under `limit`, mapping an elapsed deadline to
/// [`RepositoryError::Timeout`].
pub async fn with_timeout<F, O>(limit: Duration, fut: F) -> RepositoryResult<O>
where
    F: Future<Output = RepositoryResult<O>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "repository call timed out");
            Err(RepositoryError::Timeout(limit))
        }
    }
}
