//! Authentication: `Authorization` header value → resolved caller.

use core::fmt::Display;
use core::str::FromStr;

use keel_core::{Repository, RepositoryError};

use crate::{AuthError, CallerIdentity, TokenVerifier};

/// Scheme expected in the `Authorization` header and named in challenges.
pub const BEARER_SCHEME: &str = "Bearer";

/// Pull the token out of `Bearer <token>`.
///
/// Exactly two space-separated parts are accepted, the first being `Bearer`.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::InvalidToken)?;

    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER_SCHEME), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::InvalidToken),
    }
}

/// Authenticate a request from its `Authorization` header.
///
/// - Credential defects of any kind end in [`AuthError::InvalidToken`]; the
///   precise reason is only logged.
/// - A subject that does not parse as a key is an internal inconsistency
///   between issuer and service ([`AuthError::Internal`]).
/// - A subject without a stored caller is reported as `InvalidToken` too, so a
///   valid token for a removed account looks like any other bad token.
pub async fn authenticate<U, R>(
    header: Option<&str>,
    verifier: &TokenVerifier,
    users: &R,
) -> Result<U, AuthError>
where
    U: CallerIdentity,
    U::Key: FromStr,
    <U::Key as FromStr>::Err: Display,
    R: Repository<U> + ?Sized,
{
    let token = extract_bearer(header)?;

    let claims = verifier.verify(token).map_err(|reason| {
        tracing::debug!(%reason, "bearer token rejected");
        AuthError::InvalidToken
    })?;

    let key: U::Key = claims
        .sub
        .parse()
        .map_err(|e| AuthError::internal(format!("token subject {:?} is not a valid key: {e}", claims.sub)))?;

    match users.get_by_key(&key).await {
        Ok(user) => Ok(user),
        Err(RepositoryError::NotFound) => {
            tracing::debug!(subject = %key, "token subject has no stored caller");
            Err(AuthError::InvalidToken)
        }
        Err(e) => Err(AuthError::internal(format!("caller lookup failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use keel_infra::repository::InMemoryRepository;

    use super::*;
    use crate::{Audience, TokenClaims, TokenSettings, User};

    const SECRET: &[u8] = b"authenticate-test-secret";

    fn settings() -> TokenSettings {
        TokenSettings {
            authority: "https://identity.example".to_string(),
            audience: "catalog".to_string(),
        }
    }

    fn mint(sub: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let claims = TokenClaims {
            sub: sub.to_string(),
            iss: "https://identity.example".to_string(),
            aud: Audience::from("catalog"),
            exp: now + 600,
            nbf: None,
            iat: Some(now),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    async fn users_with(user: User) -> Arc<InMemoryRepository<User>> {
        let repo = Arc::new(InMemoryRepository::new());
        repo.create(user).await.unwrap();
        repo
    }

    #[test]
    fn extract_bearer_shapes() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(None), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("")), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("Bearer")), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("Bearer ")), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("Basic abc")), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("bearer abc")), Err(AuthError::InvalidToken));
        assert_eq!(extract_bearer(Some("Bearer a b")), Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn resolves_stored_caller() {
        let verifier = TokenVerifier::hs256(SECRET, &settings()).unwrap();
        let users = users_with(User::new(42, ["items:read"].into_iter().collect())).await;

        let header = format!("Bearer {}", mint("42"));
        let caller: User = authenticate(Some(&header), &verifier, &*users).await.unwrap();
        assert_eq!(caller.id, 42);
    }

    #[tokio::test]
    async fn unknown_subject_is_invalid_token() {
        let verifier = TokenVerifier::hs256(SECRET, &settings()).unwrap();
        let users = users_with(User::new(42, Default::default())).await;

        let header = format!("Bearer {}", mint("7"));
        let result: Result<User, _> = authenticate(Some(&header), &verifier, &*users).await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn unparseable_subject_is_internal() {
        let verifier = TokenVerifier::hs256(SECRET, &settings()).unwrap();
        let users = users_with(User::new(42, Default::default())).await;

        let header = format!("Bearer {}", mint("not-a-number"));
        let result: Result<User, _> = authenticate(Some(&header), &verifier, &*users).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn missing_header_is_invalid_token() {
        let verifier = TokenVerifier::hs256(SECRET, &settings()).unwrap();
        let users = users_with(User::new(42, Default::default())).await;

        let result: Result<User, _> = authenticate(None, &verifier, &*users).await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }
}
