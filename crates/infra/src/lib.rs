//! Infrastructure layer: repository backends and database wiring.

pub mod db;
pub mod repository;

pub use db::{DatabaseConfig, connect};
pub use repository::{InMemoryRepository, PostgresRepository};
