use crate::domain_model::*;

#[derive(Debug, thiserror::Error)]
#[error("user repo error: {0}")]
pub struct UserRepoError(pub String);

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, UserRepoError>;
}
