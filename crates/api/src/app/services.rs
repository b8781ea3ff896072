//! Storage wiring for the demo service.

use std::sync::Arc;
use std::time::Duration;

use keel_auth::{Permissions, User};
use keel_core::{Repository, RepositoryResult};
use keel_infra::{DatabaseConfig, InMemoryRepository, PostgresRepository};

use crate::app::catalog::{ITEMS_READ, ITEMS_WRITE, Item};
use crate::background::BackgroundTracker;

/// Everything a handler may reach, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<dyn Repository<User>>,
    pub items: Arc<dyn Repository<Item>>,
    pub tracker: BackgroundTracker,
}

impl AppServices {
    /// In-memory stores seeded with `users`.
    pub fn in_memory(users: impl IntoIterator<Item = User>, tracker: BackgroundTracker) -> Self {
        Self {
            users: Arc::new(InMemoryRepository::with_documents(users)),
            items: Arc::new(InMemoryRepository::<Item>::new()),
            tracker,
        }
    }

    /// Postgres-backed stores; creates the collections if missing.
    pub async fn postgres(
        config: &DatabaseConfig,
        timeout: Duration,
        tracker: BackgroundTracker,
    ) -> RepositoryResult<Self> {
        let pool = keel_infra::connect(config).await?;

        let users = PostgresRepository::<User>::new(pool.clone(), "users")?.with_timeout(timeout);
        let items = PostgresRepository::<Item>::new(pool, "items")?.with_timeout(timeout);
        users.ensure_collection().await?;
        items.ensure_collection().await?;

        Ok(Self {
            users: Arc::new(users),
            items: Arc::new(items),
            tracker,
        })
    }
}

/// Local development caller: user `1` with full catalog access.
pub fn dev_users() -> Vec<User> {
    let permissions: Permissions = [ITEMS_READ, ITEMS_WRITE]
        .iter()
        .map(|p| p.as_str().to_owned())
        .collect();
    vec![User::new(1, permissions)]
}
