use crate::domain_model::*;
use chrono::{DateTime, Utc};

/// New keypair and current refresh token to install for a user.
#[derive(Debug, Clone)]
pub struct KeyTokenWrite {
    pub user_id: UserId,
    pub key_pair: KeyPair,
    pub refresh_token: RefreshToken,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Precondition checked atomically with the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteGuard {
    /// Create the record or archive whatever is current.
    Any,
    /// Only write if the stored current refresh token is exactly this one.
    CurrentIs(RefreshToken),
}

impl WriteGuard {
    pub fn admits(&self, current: Option<&RefreshToken>) -> bool {
        match (self, current) {
            (WriteGuard::Any, _) => true,
            (WriteGuard::CurrentIs(expected), Some(current)) => expected == current,
            (WriteGuard::CurrentIs(_), None) => false,
        }
    }

    pub fn expected(&self) -> Option<&RefreshToken> {
        match self {
            WriteGuard::Any => None,
            WriteGuard::CurrentIs(token) => Some(token),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyTokenStoreError {
    #[error("record changed concurrently")]
    Conflict,
    #[error("store error: {0}")]
    Store(String),
}

#[async_trait::async_trait]
pub trait KeyTokenStore: Send + Sync {
    /// Create the record, or archive the current refresh token and replace
    /// keypair and token, if `guard` admits the stored state. All or nothing.
    async fn upsert(
        &self,
        write: KeyTokenWrite,
        guard: WriteGuard,
    ) -> Result<KeyTokenRecord, KeyTokenStoreError>;

    async fn find(&self, user_id: UserId) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError>;

    /// Remove the record and its retired tokens. Deleting nothing is fine.
    async fn delete(&self, user_id: UserId) -> Result<(), KeyTokenStoreError>;
}
