//! Capability checks against the caller's current record.

use keel_core::{Repository, RepositoryError};

use crate::{AuthError, CallerIdentity, Permission};

/// Pure policy check: does `caller` hold `required`?
///
/// - No IO
/// - No panics
pub fn authorize<U: CallerIdentity>(caller: &U, required: &Permission) -> Result<(), AuthError> {
    if caller.permissions().include(required) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(required.clone()))
    }
}

/// Re-read the caller and check `required` against the fresh copy.
///
/// Capabilities may have been revoked since the token was issued or since
/// authentication ran, so the request-scoped snapshot is never trusted here.
/// A caller deleted in between is treated like an invalid token.
pub async fn authorize_fresh<U, R>(
    caller_key: &U::Key,
    required: &Permission,
    users: &R,
) -> Result<U, AuthError>
where
    U: CallerIdentity,
    R: Repository<U> + ?Sized,
{
    let fresh = match users.get_by_key(caller_key).await {
        Ok(user) => user,
        Err(RepositoryError::NotFound) => return Err(AuthError::InvalidToken),
        Err(e) => return Err(AuthError::internal(format!("caller refresh failed: {e}"))),
    };

    authorize(&fresh, required)?;
    Ok(fresh)
}

/// Reject callers whose account is not activated.
pub fn require_activated<U: CallerIdentity>(caller: &U) -> Result<(), AuthError> {
    if caller.is_activated() {
        Ok(())
    } else {
        Err(AuthError::InactiveAccount)
    }
}

#[cfg(test)]
mod tests {
    use keel_core::Entity;
    use keel_infra::repository::InMemoryRepository;

    use super::*;
    use crate::User;

    const READ: Permission = Permission::from_static("read");
    const WRITE: Permission = Permission::from_static("write");

    #[test]
    fn read_only_caller_cannot_write() {
        let caller = User::new(1, ["read"].into_iter().collect());
        assert_eq!(authorize(&caller, &READ), Ok(()));
        assert_eq!(authorize(&caller, &WRITE), Err(AuthError::Forbidden(WRITE)));
    }

    #[tokio::test]
    async fn revocation_takes_effect_on_next_check() {
        let users = InMemoryRepository::new();
        users.create(User::new(1, ["read", "write"].into_iter().collect())).await.unwrap();

        // Snapshot taken at authentication time still lists "write".
        let snapshot = users.get_by_key(&1).await.unwrap();

        let mut revoked = snapshot.clone();
        revoked.permissions = ["read"].into_iter().collect();
        users.update(&revoked).await.unwrap();

        assert_eq!(authorize(&snapshot, &WRITE), Ok(()));
        let fresh: Result<User, _> = authorize_fresh(snapshot.key(), &WRITE, &users).await;
        assert_eq!(fresh, Err(AuthError::Forbidden(WRITE)));
    }

    #[tokio::test]
    async fn deleted_caller_is_invalid_token() {
        let users: InMemoryRepository<User> = InMemoryRepository::new();
        let result = authorize_fresh(&9, &READ, &users).await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[test]
    fn inactive_account_is_rejected() {
        let mut caller = User::new(1, Default::default());
        assert_eq!(require_activated(&caller), Ok(()));
        caller.activated = false;
        assert_eq!(require_activated(&caller), Err(AuthError::InactiveAccount));
    }
}
