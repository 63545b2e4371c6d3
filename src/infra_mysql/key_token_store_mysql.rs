use super::util::is_write_conflict;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, MySqlPool, Row};

/// `key_token` holds one row per user, `key_token_used` the retired refresh
/// tokens. Writes lock the user's row with `SELECT ... FOR UPDATE`, so the
/// guard check and the write commit together or not at all.
pub struct MySqlKeyTokenStore {
    pool: MySqlPool,
    retention: RetentionPolicy,
}

impl MySqlKeyTokenStore {
    pub fn new(pool: MySqlPool, retention: RetentionPolicy) -> Self {
        MySqlKeyTokenStore { pool, retention }
    }

    fn row_to_retired(row: MySqlRow) -> Result<RetiredToken, KeyTokenStoreError> {
        let token: String = row.try_get("refresh_token").map_err(store_err)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(store_err)?;
        Ok(RetiredToken {
            token: RefreshToken(token),
            expires_at,
        })
    }

    fn row_to_record(
        row: MySqlRow,
        used_refresh_tokens: Vec<RetiredToken>,
    ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
        let user_id: UserId = row.try_get("user_id").map_err(store_err)?;
        let public_key: String = row.try_get("public_key").map_err(store_err)?;
        let private_key: String = row.try_get("private_key").map_err(store_err)?;
        let refresh_token: String = row.try_get("refresh_token").map_err(store_err)?;
        let refresh_expires_at: DateTime<Utc> =
            row.try_get("refresh_expires_at").map_err(store_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_err)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(store_err)?;

        Ok(KeyTokenRecord {
            user_id,
            key_pair: KeyPair {
                public_key,
                private_key,
            },
            refresh_token: RefreshToken(refresh_token),
            refresh_expires_at,
            used_refresh_tokens,
            created_at,
            updated_at,
        })
    }

    async fn fetch_record(
        conn: &mut MySqlConnection,
        user_id: UserId,
    ) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, public_key, private_key, refresh_token, refresh_expires_at, created_at, updated_at
FROM key_token
WHERE user_id = ?
"#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_err)?;

        let Some(row) = row_opt else {
            return Ok(None);
        };

        let retired = sqlx::query(
            r#"
SELECT refresh_token, expires_at
FROM key_token_used
WHERE user_id = ?
ORDER BY id ASC
"#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(Self::row_to_retired)
        .collect::<Result<Vec<_>, _>>()?;

        Self::row_to_record(row, retired).map(Some)
    }

    async fn apply_retention(
        &self,
        conn: &mut MySqlConnection,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), KeyTokenStoreError> {
        if self.retention.prune_expired {
            sqlx::query("DELETE FROM key_token_used WHERE user_id = ? AND expires_at <= ?")
                .bind(user_id)
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(store_err)?;
        }

        if let Some(max) = self.retention.max_retired {
            sqlx::query(
                r#"
DELETE FROM key_token_used
WHERE user_id = ?
  AND id NOT IN (
    SELECT id FROM (
      SELECT id FROM key_token_used WHERE user_id = ? ORDER BY id DESC LIMIT ?
    ) AS keep
  )
"#,
            )
            .bind(user_id)
            .bind(user_id)
            .bind(max as u64)
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
        }

        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> KeyTokenStoreError {
    if is_write_conflict(&e) {
        KeyTokenStoreError::Conflict
    } else {
        KeyTokenStoreError::Store(e.to_string())
    }
}

#[async_trait::async_trait]
impl KeyTokenStore for MySqlKeyTokenStore {
    async fn upsert(
        &self,
        write: KeyTokenWrite,
        guard: WriteGuard,
    ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let current: Option<MySqlRow> = sqlx::query(
            r#"
SELECT refresh_token, refresh_expires_at
FROM key_token
WHERE user_id = ?
FOR UPDATE
"#,
        )
        .bind(write.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        match current {
            Some(row) => {
                let current_token: String = row.try_get("refresh_token").map_err(store_err)?;
                let current_expires_at: DateTime<Utc> =
                    row.try_get("refresh_expires_at").map_err(store_err)?;
                // Dropping `tx` rolls back and releases the row lock.
                if !guard.admits(Some(&RefreshToken(current_token.clone()))) {
                    return Err(KeyTokenStoreError::Conflict);
                }

                sqlx::query(
                    r#"
INSERT INTO key_token_used (user_id, refresh_token, expires_at, retired_at)
VALUES (?, ?, ?, ?)
"#,
                )
                .bind(write.user_id)
                .bind(&current_token)
                .bind(current_expires_at)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                sqlx::query(
                    r#"
UPDATE key_token
SET public_key = ?, private_key = ?, refresh_token = ?, refresh_expires_at = ?, updated_at = ?
WHERE user_id = ?
"#,
                )
                .bind(&write.key_pair.public_key)
                .bind(&write.key_pair.private_key)
                .bind(write.refresh_token.as_str())
                .bind(write.refresh_expires_at)
                .bind(now)
                .bind(write.user_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            None => {
                if !guard.admits(None) {
                    return Err(KeyTokenStoreError::Conflict);
                }

                sqlx::query(
                    r#"
INSERT INTO key_token
    (user_id, public_key, private_key, refresh_token, refresh_expires_at, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#,
                )
                .bind(write.user_id)
                .bind(&write.key_pair.public_key)
                .bind(&write.key_pair.private_key)
                .bind(write.refresh_token.as_str())
                .bind(write.refresh_expires_at)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }

        self.apply_retention(&mut tx, write.user_id, now).await?;

        let record = Self::fetch_record(&mut tx, write.user_id)
            .await?
            .ok_or_else(|| KeyTokenStoreError::Store("record vanished mid-write".to_string()))?;

        tx.commit().await.map_err(store_err)?;

        Ok(record)
    }

    async fn find(&self, user_id: UserId) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
        // One snapshot for both tables.
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let record = Self::fetch_record(&mut tx, user_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(record)
    }

    async fn delete(&self, user_id: UserId) -> Result<(), KeyTokenStoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM key_token_used WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        sqlx::query("DELETE FROM key_token WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }
}
