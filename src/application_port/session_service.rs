use super::TokenError;
use crate::domain_model::*;
use crate::domain_port::{KeyTokenStoreError, UserRepoError};
use serde::Serialize;

pub const MSG_USER_NOT_REGISTERED: &str = "user is not registered";
pub const MSG_REFRESH_TOKEN_NOT_FOUND: &str = "refresh token not found";
pub const MSG_INVALID_SIGNATURE: &str = "invalid token signature";
pub const MSG_REFRESH_TOKEN_EXPIRED: &str = "refresh token expired";
pub const MSG_ACCESS_TOKEN_EXPIRED: &str = "access token expired";
pub const MSG_REUSE_DETECTED: &str = "something wrong happened";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Authentication required. Retrying with the same token cannot succeed.
    #[error("authorization failed: {0}")]
    AuthorizedFail(String),
    /// Refresh token reuse. The session has been destroyed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Nothing was persisted, the whole call may be retried.
    #[error("signing error: {0}")]
    Signing(String),
    /// The stored record was left as it was, the whole call may be retried.
    #[error("store error: {0}")]
    Store(String),
}

impl SessionError {
    pub fn authorized_fail(message: &str) -> Self {
        SessionError::AuthorizedFail(message.to_string())
    }

    pub fn message(&self) -> &str {
        match self {
            SessionError::AuthorizedFail(m)
            | SessionError::Forbidden(m)
            | SessionError::Signing(m)
            | SessionError::Store(m) => m,
        }
    }
}

impl From<KeyTokenStoreError> for SessionError {
    fn from(err: KeyTokenStoreError) -> Self {
        match err {
            KeyTokenStoreError::Conflict => SessionError::Store(err.to_string()),
            KeyTokenStoreError::Store(e) => SessionError::Store(e),
        }
    }
}

impl From<UserRepoError> for SessionError {
    fn from(err: UserRepoError) -> Self {
        SessionError::Store(err.0)
    }
}

/// Only signing-side failures convert implicitly; verification failures
/// depend on which token was being checked.
impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) | TokenError::KeyGeneration(e) => SessionError::Signing(e),
            other => SessionError::AuthorizedFail(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    pub user: UserProfile,
    pub tokens: TokenPair,
}

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Start a session for an already authenticated user.
    async fn login(&self, user: &UserRecord) -> Result<SessionGrant, SessionError>;

    /// Exchange the current refresh token for a new pair.
    async fn rotate(&self, refresh_token: &RefreshToken) -> Result<SessionGrant, SessionError>;

    /// Check an access token against the user's stored public key.
    async fn authenticate(&self, access_token: &AccessToken) -> Result<TokenClaims, SessionError>;

    async fn logout(&self, user_id: UserId) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_strips_the_variant_prefix() {
        let err = SessionError::Forbidden(MSG_REUSE_DETECTED.to_string());
        assert_eq!(err.message(), MSG_REUSE_DETECTED);
        assert_eq!(err.to_string(), "forbidden: something wrong happened");
    }

    #[test]
    fn store_conflict_maps_to_retryable_store_error() {
        let err = SessionError::from(KeyTokenStoreError::Conflict);
        assert!(matches!(err, SessionError::Store(_)));

        let err = SessionError::from(TokenError::KeyGeneration("no entropy".to_string()));
        assert_eq!(err.message(), "no entropy");
    }
}
