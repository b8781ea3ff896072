//! [`Repository`](keel_core::Repository) implementations.

pub mod in_memory;
pub mod postgres;
mod query;

pub use in_memory::InMemoryRepository;
pub use postgres::PostgresRepository;
