//! Postgres-backed document repository.
//!
//! Each collection is a table of `(key JSONB PRIMARY KEY, version BIGINT, doc JSONB)`.
//! Filters and sorting run against `doc`; the `key` column is the stable
//! tiebreaker for ordering.
//!
//! ## Error mapping
//!
//! | Condition | Result |
//! |-----------|--------|
//! | no row for key/filter | `NotFound` |
//! | versioned update touched 0 rows | `EditConflict` |
//! | delete touched 0 rows | `NotFound` |
//! | unique violation (`23505`) on insert | `DuplicateKey` |
//! | deadline elapsed | `Timeout` |
//! | anything else | `Storage` |

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{
    DEFAULT_OPERATION_TIMEOUT, DocumentFilter, Entity, Metadata, PageRequest, Repository,
    RepositoryError, RepositoryResult, with_timeout,
};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;

use super::query::{self, Bind, Statement};

pub struct PostgresRepository<T> {
    pool: PgPool,
    table: String,
    timeout: Duration,
    _entity: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for PostgresRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRepository")
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Entity> PostgresRepository<T> {
    /// Bind a repository to `collection` (a lowercase SQL identifier).
    pub fn new(pool: PgPool, collection: &str) -> RepositoryResult<Self> {
        if !query::is_valid_table_name(collection) {
            return Err(RepositoryError::storage(format!(
                "invalid collection name: {collection:?}"
            )));
        }

        Ok(Self {
            pool,
            table: collection.to_string(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
            _entity: PhantomData,
        })
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn collection(&self) -> &str {
        &self.table
    }

    /// Create the backing table if missing.
    #[instrument(skip_all, fields(collection = %self.table), err)]
    pub async fn ensure_collection(&self) -> RepositoryResult<()> {
        let sql = query::create_table(&self.table);
        with_timeout(self.timeout, async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_collection", e))?;
            Ok(())
        })
        .await
    }

    async fn fetch_optional(&self, operation: &str, stmt: Statement) -> RepositoryResult<Option<T>> {
        let row = bind_all(sqlx::query(&stmt.sql), stmt.binds)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.map(|row| decode_doc(&row)).transpose()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for PostgresRepository<T> {
    #[instrument(skip_all, fields(collection = %self.table, key = %key), err)]
    async fn get_by_key(&self, key: &T::Key) -> RepositoryResult<T> {
        let stmt = query::select_by_key(&self.table, serde_json::to_value(key)?);
        with_timeout(self.timeout, async {
            self.fetch_optional("get_by_key", stmt)
                .await?
                .ok_or(RepositoryError::NotFound)
        })
        .await
    }

    #[instrument(skip_all, fields(collection = %self.table), err)]
    async fn get_by_filter(&self, filter: &DocumentFilter) -> RepositoryResult<T> {
        let stmt = query::select_first(&self.table, filter);
        with_timeout(self.timeout, async {
            self.fetch_optional("get_by_filter", stmt)
                .await?
                .ok_or(RepositoryError::NotFound)
        })
        .await
    }

    // Count and page are separate reads; concurrent writes between them can
    // make total_records disagree with the returned page.
    #[instrument(skip_all, fields(collection = %self.table, sort = %page.sort), err)]
    async fn list(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> RepositoryResult<(Vec<T>, Metadata)> {
        let count = query::count(&self.table, filter);
        let select = query::select_page(&self.table, filter, page);

        with_timeout(self.timeout, async {
            let total: i64 = bind_all(sqlx::query(&count.sql), count.binds)
                .fetch_one(&self.pool)
                .await
                .and_then(|row| row.try_get(0))
                .map_err(|e| map_sqlx_error("count", e))?;

            let rows = bind_all(sqlx::query(&select.sql), select.binds)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("list", e))?;

            let items = rows
                .iter()
                .map(decode_doc)
                .collect::<RepositoryResult<Vec<T>>>()?;

            let total = u64::try_from(total).unwrap_or(0);
            Ok((items, Metadata::calculate(total, page.page, page.page_size)))
        })
        .await
    }

    #[instrument(skip_all, fields(collection = %self.table, key = %entity.key()), err)]
    async fn create(&self, entity: T) -> RepositoryResult<T::Key> {
        let key = entity.key().clone();
        let stmt = query::insert(
            &self.table,
            serde_json::to_value(&key)?,
            to_i64(entity.version())?,
            serde_json::to_value(&entity)?,
        );

        with_timeout(self.timeout, async {
            bind_all(sqlx::query(&stmt.sql), stmt.binds)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        RepositoryError::DuplicateKey(key.to_string())
                    } else {
                        map_sqlx_error("create", e)
                    }
                })?;
            Ok(key.clone())
        })
        .await
    }

    #[instrument(
        skip_all,
        fields(collection = %self.table, key = %entity.key(), version = entity.version()),
        err
    )]
    async fn update(&self, entity: &T) -> RepositoryResult<T> {
        let expected = entity.version();
        let next = entity.clone().with_version(expected + 1);
        let stmt = query::update_versioned(
            &self.table,
            serde_json::to_value(entity.key())?,
            to_i64(expected)?,
            to_i64(expected + 1)?,
            serde_json::to_value(&next)?,
        );

        with_timeout(self.timeout, async {
            let result = bind_all(sqlx::query(&stmt.sql), stmt.binds)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update", e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::EditConflict);
            }
            Ok(next)
        })
        .await
    }

    #[instrument(skip_all, fields(collection = %self.table, key = %key), err)]
    async fn delete(&self, key: &T::Key) -> RepositoryResult<()> {
        let stmt = query::delete(&self.table, serde_json::to_value(key)?);

        with_timeout(self.timeout, async {
            let result = bind_all(sqlx::query(&stmt.sql), stmt.binds)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete", e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

fn bind_all(mut q: Query<'_, Postgres, PgArguments>, binds: Vec<Bind>) -> Query<'_, Postgres, PgArguments> {
    for bind in binds {
        q = match bind {
            Bind::Json(value) => q.bind(value),
            Bind::Path(path) => q.bind(path),
            Bind::Float(value) => q.bind(value),
            Bind::Int(value) => q.bind(value),
        };
    }
    q
}

fn decode_doc<T: Entity>(row: &PgRow) -> RepositoryResult<T> {
    let doc: Value = row
        .try_get("doc")
        .map_err(|e| map_sqlx_error("decode_doc", e))?;
    Ok(serde_json::from_value(doc)?)
}

fn to_i64(version: u64) -> RepositoryResult<i64> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::storage(format!("version {version} exceeds BIGINT range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => RepositoryError::storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolTimedOut => {
            RepositoryError::storage(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::storage(format!("connection pool closed in {operation}"))
        }
        _ => RepositoryError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
