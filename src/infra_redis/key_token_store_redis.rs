use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

const KEY_TOKEN_UPSERT: &str = include_str!("key_token_upsert.lua");

/// One hash per user for the live state and one list for its retired
/// refresh tokens. Every write goes through a single script so Redis applies
/// it atomically.
pub struct RedisKeyTokenStore {
    conn: ConnectionManager,
    prefix: String,
    retention: RetentionPolicy,
}

impl RedisKeyTokenStore {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        retention: RetentionPolicy,
    ) -> Self {
        RedisKeyTokenStore {
            conn,
            prefix: prefix.into(),
            retention,
        }
    }

    fn record_key(&self, user_id: UserId) -> String {
        format!("{}:{}", self.prefix, user_id)
    }

    fn retired_key(&self, user_id: UserId) -> String {
        format!("{}:{}:used", self.prefix, user_id)
    }
}

fn store_err(e: redis::RedisError) -> KeyTokenStoreError {
    KeyTokenStoreError::Store(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, KeyTokenStoreError> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| KeyTokenStoreError::Store(format!("bad timestamp: {raw}")))
}

fn parse_retired(entries: Vec<String>) -> Result<Vec<RetiredToken>, KeyTokenStoreError> {
    entries
        .into_iter()
        .map(|entry| {
            let (expires_at, token) = entry
                .split_once('|')
                .ok_or_else(|| KeyTokenStoreError::Store("bad retired entry".to_string()))?;
            Ok(RetiredToken {
                token: RefreshToken(token.to_string()),
                expires_at: parse_timestamp(expires_at)?,
            })
        })
        .collect()
}

fn field<'a>(
    fields: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a String, KeyTokenStoreError> {
    fields
        .get(name)
        .ok_or_else(|| KeyTokenStoreError::Store(format!("missing field: {name}")))
}

#[async_trait::async_trait]
impl KeyTokenStore for RedisKeyTokenStore {
    async fn upsert(
        &self,
        write: KeyTokenWrite,
        guard: WriteGuard,
    ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
        let now = Utc::now();
        let expected = guard.expected().map(|t| t.as_str()).unwrap_or("");
        let mut conn = self.conn.clone();

        let (status, created_at, retired): (i64, String, Vec<String>) =
            Script::new(KEY_TOKEN_UPSERT)
                .key(self.record_key(write.user_id))
                .key(self.retired_key(write.user_id))
                .arg(expected)
                .arg(&write.key_pair.public_key)
                .arg(&write.key_pair.private_key)
                .arg(write.refresh_token.as_str())
                .arg(write.refresh_expires_at.timestamp())
                .arg(now.timestamp())
                .arg(self.retention.max_retired.map_or(-1, |max| max as i64))
                .arg(if self.retention.prune_expired { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;

        if status != 1 {
            return Err(KeyTokenStoreError::Conflict);
        }

        Ok(KeyTokenRecord {
            user_id: write.user_id,
            key_pair: write.key_pair,
            refresh_token: write.refresh_token,
            refresh_expires_at: write.refresh_expires_at,
            used_refresh_tokens: parse_retired(retired)?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: now,
        })
    }

    async fn find(&self, user_id: UserId) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
        let mut conn = self.conn.clone();
        let (fields, retired): (HashMap<String, String>, Vec<String>) = redis::pipe()
            .atomic()
            .hgetall(self.record_key(user_id))
            .lrange(self.retired_key(user_id), 0, -1)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(KeyTokenRecord {
            user_id,
            key_pair: KeyPair {
                public_key: field(&fields, "public_key")?.clone(),
                private_key: field(&fields, "private_key")?.clone(),
            },
            refresh_token: RefreshToken(field(&fields, "refresh_token")?.clone()),
            refresh_expires_at: parse_timestamp(field(&fields, "refresh_expires_at")?)?,
            used_refresh_tokens: parse_retired(retired)?,
            created_at: parse_timestamp(field(&fields, "created_at")?)?,
            updated_at: parse_timestamp(field(&fields, "updated_at")?)?,
        }))
    }

    async fn delete(&self, user_id: UserId) -> Result<(), KeyTokenStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(vec![self.record_key(user_id), self.retired_key(user_id)])
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_entries_split_on_first_separator() {
        let retired = parse_retired(vec!["1700000000|aaa.bbb.ccc".to_string()]).unwrap();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].token, RefreshToken("aaa.bbb.ccc".to_string()));
        assert_eq!(retired[0].expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn malformed_entries_are_store_errors() {
        assert!(matches!(
            parse_retired(vec!["no-separator".to_string()]),
            Err(KeyTokenStoreError::Store(_))
        ));
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(KeyTokenStoreError::Store(_))
        ));
    }
}
