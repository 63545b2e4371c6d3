use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

/// Read-only view over the `user` table owned by the account service.
pub struct MySqlUserRepo {
    pool: MySqlPool,
}

impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserRepo { pool }
    }

    fn row_to_record(row: MySqlRow) -> Result<UserRecord, UserRepoError> {
        let get_err = |e: sqlx::Error| UserRepoError(format!("decode user: {e}"));

        Ok(UserRecord {
            user_id: row.try_get("user_id").map_err(get_err)?,
            name: row.try_get("name").map_err(get_err)?,
            email: row.try_get("email").map_err(get_err)?,
            password_hash: row.try_get("password_hash").map_err(get_err)?,
            cart_id: row.try_get("cart_id").map_err(get_err)?,
            gender: row.try_get("gender").map_err(get_err)?,
            avatar: row.try_get("avatar").map_err(get_err)?,
            account: row.try_get("account").map_err(get_err)?,
            address: row.try_get("address").map_err(get_err)?,
        })
    }
}

#[async_trait::async_trait]
impl UserRepo for MySqlUserRepo {
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, UserRepoError> {
        let row_opt = sqlx::query(
            r#"
SELECT user_id, name, email, password_hash, cart_id, gender, avatar, account, address
FROM user
WHERE user_id = ?
"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| UserRepoError(format!("query user: {e}")))?;

        row_opt.map(Self::row_to_record).transpose()
    }
}
