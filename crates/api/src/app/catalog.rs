//! Demo catalog domain served by the `keel-api` binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_auth::Permission;
use keel_core::{DocumentId, Entity, ValidationErrors};

pub const ITEMS_READ: Permission = Permission::from_static("items:read");
pub const ITEMS_WRITE: Permission = Permission::from_static("items:write");

pub const ITEM_SORT_SAFELIST: &[&str] = &["id", "name", "price", "-id", "-name", "-price"];

const MAX_NAME_BYTES: usize = 500;
const MAX_DESCRIPTION_BYTES: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: DocumentId,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Item {
    pub fn new(name: impl Into<String>, description: impl Into<String>, price: f64) -> Self {
        Self {
            id: DocumentId::new(),
            name: name.into(),
            description: description.into(),
            price,
            created_at: Utc::now(),
            version: 1,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(!self.name.trim().is_empty(), "name", "must be provided");
        errors.check(
            self.name.len() <= MAX_NAME_BYTES,
            "name",
            "must not be more than 500 bytes long",
        );
        errors.check(
            self.description.len() <= MAX_DESCRIPTION_BYTES,
            "description",
            "must not be more than 1000 bytes long",
        );
        errors.check(
            self.price.is_finite() && self.price >= 0.0,
            "price",
            "must be a non-negative number",
        );
        errors.into_result()
    }
}

impl Entity for Item {
    type Key = DocumentId;

    fn key(&self) -> &DocumentId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_items_start_at_version_one() {
        let item = Item::new("bolt", "M6 hex bolt", 0.25);
        assert_eq!(item.version(), 1);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn validation_reports_each_bad_field() {
        let item = Item::new("  ", "x".repeat(1_001), -1.0);
        let errors = item.validate().unwrap_err();
        assert_eq!(errors.get("name"), Some("must be provided"));
        assert_eq!(errors.get("description"), Some("must not be more than 1000 bytes long"));
        assert_eq!(errors.get("price"), Some("must be a non-negative number"));
    }
}
