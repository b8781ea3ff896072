//! Error model shared by repositories and request validation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type used by every repository operation.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository-level error.
///
/// `NotFound` and `EditConflict` are expected outcomes that callers must
/// interpret (retry after re-fetch, 404, ...). Everything else is an
/// infrastructure failure and surfaces as a server error at the HTTP edge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No document matched the key or filter.
    #[error("record not found")]
    NotFound,

    /// The stored version no longer matches the submitted one, or the document
    /// disappeared between read and write.
    #[error("edit conflict")]
    EditConflict,

    /// `create` was called with a key that is already stored.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The per-call deadline elapsed before the backend answered.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend failure (connectivity, serialization, driver errors).
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// True for the outcomes a handler is expected to branch on.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotFound | Self::EditConflict)
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(format!("document (de)serialization failed: {value}"))
    }
}

/// An identifier could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct InvalidId(pub String);

/// Field-level validation failures, keyed by field name.
///
/// Only the first message per field is kept.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("validation failed: {errors:?}")]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    /// Record `message` for `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: impl Into<String>, message: impl Into<String>) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}
