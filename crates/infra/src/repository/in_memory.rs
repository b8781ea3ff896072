use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use keel_core::{
    DocumentFilter, Entity, Metadata, PageRequest, Repository, RepositoryError, RepositoryResult,
    SortDirection,
};
use serde_json::Value;

/// In-memory repository for tests/dev.
///
/// Documents are kept in key order; queries run against their serialized JSON
/// form so filters and sorting behave like the Postgres backend.
#[derive(Debug)]
pub struct InMemoryRepository<T: Entity> {
    documents: RwLock<BTreeMap<T::Key, T>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed the store, bypassing version checks.
    pub fn with_documents(documents: impl IntoIterator<Item = T>) -> Self {
        let map = documents
            .into_iter()
            .map(|doc| (doc.key().clone(), doc))
            .collect();
        Self {
            documents: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::storage("in-memory repository lock poisoned")
    }

    /// Matching documents in key order, paired with their JSON form.
    fn matching(&self, filter: &DocumentFilter) -> RepositoryResult<Vec<(T, Value)>> {
        let map = self.documents.read().map_err(|_| Self::poisoned())?;
        let mut out = Vec::new();
        for doc in map.values() {
            let json = serde_json::to_value(doc)?;
            if filter.matches(&json) {
                out.push((doc.clone(), json));
            }
        }
        Ok(out)
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get_by_key(&self, key: &T::Key) -> RepositoryResult<T> {
        let map = self.documents.read().map_err(|_| Self::poisoned())?;
        map.get(key).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn get_by_filter(&self, filter: &DocumentFilter) -> RepositoryResult<T> {
        self.matching(filter)?
            .into_iter()
            .next()
            .map(|(doc, _)| doc)
            .ok_or(RepositoryError::NotFound)
    }

    async fn list(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> RepositoryResult<(Vec<T>, Metadata)> {
        let column = page.sort_column().to_owned();
        let direction = page.sort_direction();

        let mut rows = self.matching(filter)?;
        let total = rows.len() as u64;

        // Key order from the BTreeMap is the tiebreaker; sort_by is stable.
        rows.sort_by(|(_, a), (_, b)| {
            let ord = compare_json(a.get(&column), b.get(&column));
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });

        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        let items = rows
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(doc, _)| doc)
            .collect();

        Ok((items, Metadata::calculate(total, page.page, page.page_size)))
    }

    async fn create(&self, entity: T) -> RepositoryResult<T::Key> {
        let mut map = self.documents.write().map_err(|_| Self::poisoned())?;
        let key = entity.key().clone();
        if map.contains_key(&key) {
            return Err(RepositoryError::DuplicateKey(key.to_string()));
        }
        map.insert(key.clone(), entity);
        Ok(key)
    }

    async fn update(&self, entity: &T) -> RepositoryResult<T> {
        let mut map = self.documents.write().map_err(|_| Self::poisoned())?;
        let Some(stored) = map.get_mut(entity.key()) else {
            return Err(RepositoryError::EditConflict);
        };
        if stored.version() != entity.version() {
            return Err(RepositoryError::EditConflict);
        }

        let next = entity.clone().with_version(entity.version() + 1);
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, key: &T::Key) -> RepositoryResult<()> {
        let mut map = self.documents.write().map_err(|_| Self::poisoned())?;
        map.remove(key).map(|_| ()).ok_or(RepositoryError::NotFound)
    }
}

/// Total order over JSON values used for sorting.
///
/// Missing and null sort first, then booleans, numbers, strings, and finally
/// arrays/objects (compared by their serialized text).
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 4 && rank(b) == 4 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
