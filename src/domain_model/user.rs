use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new_random() -> Self {
        UserId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::from_str(s).map(UserId)
    }
}

/// A user row as owned by the catalog/auth collaborator.
///
/// Only read here. `password_hash` must never leave this crate, which is why
/// callers only ever get a [`UserProfile`] back.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Sanitized projection returned alongside issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub cart_id: Option<String>,
    pub gender: Option<String>,
    pub avatar: Option<String>,
    pub account: Option<String>,
    pub address: Option<String>,
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        UserProfile {
            id: user.user_id,
            name: user.name.clone(),
            email: user.email.clone(),
            cart_id: user.cart_id.clone(),
            gender: user.gender.clone(),
            avatar: user.avatar.clone(),
            account: user.account.clone(),
            address: user.address.clone(),
        }
    }
}
