use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Process-local store. The DashMap entry lock is the per-user critical
/// section; nothing inside it awaits, so a cancelled caller can never leave
/// a record half written.
#[derive(Default)]
pub struct MemoryKeyTokenStore {
    records: DashMap<UserId, KeyTokenRecord>,
    retention: RetentionPolicy,
}

impl MemoryKeyTokenStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        MemoryKeyTokenStore {
            records: DashMap::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyTokenStore for MemoryKeyTokenStore {
    async fn upsert(
        &self,
        write: KeyTokenWrite,
        guard: WriteGuard,
    ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
        let now = Utc::now();
        match self.records.entry(write.user_id) {
            Entry::Occupied(mut entry) => {
                if !guard.admits(Some(&entry.get().refresh_token)) {
                    return Err(KeyTokenStoreError::Conflict);
                }
                entry.get_mut().archive_and_replace(
                    write.key_pair,
                    write.refresh_token,
                    write.refresh_expires_at,
                    &self.retention,
                    now,
                );
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                if !guard.admits(None) {
                    return Err(KeyTokenStoreError::Conflict);
                }
                let record = KeyTokenRecord::new(
                    write.user_id,
                    write.key_pair,
                    write.refresh_token,
                    write.refresh_expires_at,
                    now,
                );
                entry.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find(&self, user_id: UserId) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
        Ok(self.records.get(&user_id).map(|r| r.value().clone()))
    }

    async fn delete(&self, user_id: UserId) -> Result<(), KeyTokenStoreError> {
        self.records.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write(user_id: UserId, tag: &str) -> KeyTokenWrite {
        KeyTokenWrite {
            user_id,
            key_pair: KeyPair {
                public_key: format!("public-{tag}"),
                private_key: format!("private-{tag}"),
            },
            refresh_token: RefreshToken(format!("refresh-{tag}")),
            refresh_expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn first_upsert_creates_empty_history() {
        let store = MemoryKeyTokenStore::default();
        let user_id = UserId::new_random();

        let record = store.upsert(write(user_id, "1"), WriteGuard::Any).await.unwrap();
        assert_eq!(record.refresh_token, RefreshToken("refresh-1".to_string()));
        assert!(record.used_refresh_tokens.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn guarded_upsert_archives_previous_token() {
        let store = MemoryKeyTokenStore::default();
        let user_id = UserId::new_random();
        store.upsert(write(user_id, "1"), WriteGuard::Any).await.unwrap();

        let record = store
            .upsert(
                write(user_id, "2"),
                WriteGuard::CurrentIs(RefreshToken("refresh-1".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(record.refresh_token, RefreshToken("refresh-2".to_string()));
        assert_eq!(record.key_pair.public_key, "public-2");
        assert!(record.is_retired(&RefreshToken("refresh-1".to_string())));
    }

    #[tokio::test]
    async fn stale_guard_conflicts_without_writing() {
        let store = MemoryKeyTokenStore::default();
        let user_id = UserId::new_random();
        store.upsert(write(user_id, "1"), WriteGuard::Any).await.unwrap();
        store
            .upsert(
                write(user_id, "2"),
                WriteGuard::CurrentIs(RefreshToken("refresh-1".to_string())),
            )
            .await
            .unwrap();

        let result = store
            .upsert(
                write(user_id, "3"),
                WriteGuard::CurrentIs(RefreshToken("refresh-1".to_string())),
            )
            .await;
        assert!(matches!(result, Err(KeyTokenStoreError::Conflict)));

        let record = store.find(user_id).await.unwrap().unwrap();
        assert_eq!(record.refresh_token, RefreshToken("refresh-2".to_string()));
        assert_eq!(record.used_refresh_tokens.len(), 1);
    }

    #[tokio::test]
    async fn guarded_upsert_on_missing_record_conflicts() {
        let store = MemoryKeyTokenStore::default();
        let result = store
            .upsert(
                write(UserId::new_random(), "1"),
                WriteGuard::CurrentIs(RefreshToken("refresh-0".to_string())),
            )
            .await;
        assert!(matches!(result, Err(KeyTokenStoreError::Conflict)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryKeyTokenStore::default();
        let user_id = UserId::new_random();
        store.upsert(write(user_id, "1"), WriteGuard::Any).await.unwrap();

        store.delete(user_id).await.unwrap();
        store.delete(user_id).await.unwrap();
        assert!(store.find(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retention_policy_is_applied_on_write() {
        let store = MemoryKeyTokenStore::new(RetentionPolicy {
            max_retired: Some(1),
            prune_expired: false,
        });
        let user_id = UserId::new_random();
        store.upsert(write(user_id, "1"), WriteGuard::Any).await.unwrap();
        store.upsert(write(user_id, "2"), WriteGuard::Any).await.unwrap();
        let record = store.upsert(write(user_id, "3"), WriteGuard::Any).await.unwrap();

        assert_eq!(record.used_refresh_tokens.len(), 1);
        assert!(record.is_retired(&RefreshToken("refresh-2".to_string())));
        assert!(!record.is_retired(&RefreshToken("refresh-1".to_string())));
    }
}
