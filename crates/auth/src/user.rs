//! Default caller record shared by services.

use serde::{Deserialize, Serialize};

use keel_core::Entity;

use crate::{CallerIdentity, Permissions};

/// A caller as replicated into each service's own store.
///
/// The identity service owns the canonical record; services keep a copy keyed
/// by the same numeric id the tokens carry in `sub`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub permissions: Permissions,
    pub activated: bool,
    pub version: u64,
}

impl User {
    pub fn new(id: i64, permissions: Permissions) -> Self {
        Self {
            id,
            permissions,
            activated: true,
            version: 1,
        }
    }
}

impl Entity for User {
    type Key = i64;

    fn key(&self) -> &i64 {
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

impl CallerIdentity for User {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn is_activated(&self) -> bool {
        self.activated
    }
}
