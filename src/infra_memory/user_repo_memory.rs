use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;

/// User lookup backed by a map, seeded from settings or by tests.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: DashMap<UserId, UserRecord>,
}

impl MemoryUserRepo {
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let repo = MemoryUserRepo::default();
        for user in users {
            repo.insert(user);
        }
        repo
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.insert(user.user_id, user);
    }

    pub fn remove(&self, user_id: UserId) {
        self.users.remove(&user_id);
    }
}

#[async_trait::async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, UserRepoError> {
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }
}
