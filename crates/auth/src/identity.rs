use keel_core::Entity;

use crate::Permissions;

/// What the auth stages need to know about a caller.
///
/// Implemented by the user entity a service stores; the stages only ever hold
/// a request-scoped copy.
pub trait CallerIdentity: Entity {
    fn permissions(&self) -> &Permissions;

    fn is_activated(&self) -> bool;
}
