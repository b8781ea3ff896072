//! `keel-core`: shared building blocks for every keel service.
//!
//! This crate holds the storage-agnostic contracts: entities and their keys,
//! the repository trait, pagination math and document filters. Nothing here
//! talks to a database or to HTTP.

pub mod entity;
pub mod error;
pub mod filter;
pub mod id;
pub mod pagination;
pub mod repository;

pub use entity::{Entity, EntityKey};
pub use error::{InvalidId, RepositoryError, RepositoryResult, ValidationErrors};
pub use filter::{Condition, DocumentFilter};
pub use id::DocumentId;
pub use pagination::{Metadata, PageRequest, SortDirection};
pub use repository::{DEFAULT_OPERATION_TIMEOUT, Repository, with_timeout};
