use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Generate a new signing keypair on every rotation, not only on login.
    pub rotate_keypair: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            rotate_keypair: true,
        }
    }
}

/// Login, refresh rotation with reuse detection, access checks and logout
/// over a per-user [`KeyTokenRecord`].
pub struct SessionRotator {
    key_token_store: Arc<dyn KeyTokenStore>,
    user_repo: Arc<dyn UserRepo>,
    token_issuer: Arc<dyn TokenIssuer>,
    key_pair_generator: Arc<dyn KeyPairGenerator>,
    config: RotationConfig,
}

impl SessionRotator {
    pub fn new(
        key_token_store: Arc<dyn KeyTokenStore>,
        user_repo: Arc<dyn UserRepo>,
        token_issuer: Arc<dyn TokenIssuer>,
        key_pair_generator: Arc<dyn KeyPairGenerator>,
        config: RotationConfig,
    ) -> Self {
        Self {
            key_token_store,
            user_repo,
            token_issuer,
            key_pair_generator,
            config,
        }
    }

    async fn find_record(&self, user_id: UserId) -> Result<KeyTokenRecord, SessionError> {
        self.key_token_store
            .find(user_id)
            .await?
            .ok_or_else(|| SessionError::authorized_fail(MSG_USER_NOT_REGISTERED))
    }

    async fn revoke_on_reuse(
        &self,
        user_id: UserId,
        presented: &RefreshToken,
    ) -> Result<(), SessionError> {
        warn!(
            %user_id,
            token = %presented.fingerprint(),
            "retired refresh token presented, revoking session"
        );
        self.key_token_store.delete(user_id).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionService for SessionRotator {
    async fn login(&self, user: &UserRecord) -> Result<SessionGrant, SessionError> {
        let key_pair = self.key_pair_generator.generate().await?;
        let payload = TokenPayload {
            user_id: user.user_id,
            email: user.email.clone(),
        };
        let tokens = self.token_issuer.issue(&payload, &key_pair).await?;

        let record = self
            .key_token_store
            .upsert(
                KeyTokenWrite {
                    user_id: user.user_id,
                    key_pair,
                    refresh_token: tokens.refresh_token.clone(),
                    refresh_expires_at: tokens.refresh_token_expires_at,
                },
                WriteGuard::Any,
            )
            .await?;

        info!(
            user_id = %user.user_id,
            retired = record.used_refresh_tokens.len(),
            "session started"
        );

        Ok(SessionGrant {
            user: UserProfile::from(user),
            tokens,
        })
    }

    async fn rotate(&self, presented: &RefreshToken) -> Result<SessionGrant, SessionError> {
        let claims = self
            .token_issuer
            .decode_unverified(presented.as_str())
            .map_err(|_| SessionError::authorized_fail(MSG_REFRESH_TOKEN_NOT_FOUND))?;
        let user_id = claims.user_id;

        let record = self.find_record(user_id).await?;

        // Reuse must be checked before currency, or a replayed token would
        // just look unknown.
        if record.is_retired(presented) {
            self.revoke_on_reuse(user_id, presented).await?;
            return Err(SessionError::Forbidden(MSG_REUSE_DETECTED.to_string()));
        }
        if !record.is_current(presented) {
            return Err(SessionError::authorized_fail(MSG_REFRESH_TOKEN_NOT_FOUND));
        }

        let verified = self
            .token_issuer
            .verify(
                presented.as_str(),
                TokenKind::Refresh,
                &record.key_pair.public_key,
            )
            .await
            .map_err(|e| match e {
                TokenError::Expired => SessionError::authorized_fail(MSG_REFRESH_TOKEN_EXPIRED),
                _ => SessionError::authorized_fail(MSG_INVALID_SIGNATURE),
            })?;

        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| SessionError::authorized_fail(MSG_USER_NOT_REGISTERED))?;

        let key_pair = if self.config.rotate_keypair {
            self.key_pair_generator.generate().await?
        } else {
            record.key_pair.clone()
        };
        let tokens = self
            .token_issuer
            .issue(&verified.payload(), &key_pair)
            .await?;

        let write = KeyTokenWrite {
            user_id,
            key_pair,
            refresh_token: tokens.refresh_token.clone(),
            refresh_expires_at: tokens.refresh_token_expires_at,
        };
        match self
            .key_token_store
            .upsert(write, WriteGuard::CurrentIs(presented.clone()))
            .await
        {
            Ok(_) => {}
            Err(KeyTokenStoreError::Conflict) => {
                debug!(
                    %user_id,
                    token = %presented.fingerprint(),
                    "refresh token consumed by a concurrent rotation"
                );
                return Err(SessionError::authorized_fail(MSG_REFRESH_TOKEN_NOT_FOUND));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(
            %user_id,
            retired = %presented.fingerprint(),
            current = %tokens.refresh_token.fingerprint(),
            "refresh token rotated"
        );

        Ok(SessionGrant {
            user: UserProfile::from(&user),
            tokens,
        })
    }

    async fn authenticate(&self, access_token: &AccessToken) -> Result<TokenClaims, SessionError> {
        let claims = self
            .token_issuer
            .decode_unverified(access_token.as_str())
            .map_err(|_| SessionError::authorized_fail(MSG_INVALID_SIGNATURE))?;

        let record = self.find_record(claims.user_id).await?;

        self.token_issuer
            .verify(
                access_token.as_str(),
                TokenKind::Access,
                &record.key_pair.public_key,
            )
            .await
            .map_err(|e| match e {
                TokenError::Expired => SessionError::authorized_fail(MSG_ACCESS_TOKEN_EXPIRED),
                _ => SessionError::authorized_fail(MSG_INVALID_SIGNATURE),
            })
    }

    async fn logout(&self, user_id: UserId) -> Result<(), SessionError> {
        self.key_token_store.delete(user_id).await?;
        info!(%user_id, "session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{JwtConfig, JwtTokenIssuer, PemKeyPairGenerator, SigningAlgorithm};
    use crate::infra_memory::{MemoryKeyTokenStore, MemoryUserRepo};
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingGenerator;

    #[async_trait::async_trait]
    impl KeyPairGenerator for FailingGenerator {
        async fn generate(&self) -> Result<KeyPair, TokenError> {
            Err(TokenError::KeyGeneration("entropy unavailable".to_string()))
        }
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl KeyTokenStore for BrokenStore {
        async fn upsert(
            &self,
            _write: KeyTokenWrite,
            _guard: WriteGuard,
        ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
            Err(KeyTokenStoreError::Store("connection reset".to_string()))
        }

        async fn find(
            &self,
            _user_id: UserId,
        ) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
            Err(KeyTokenStoreError::Store("connection reset".to_string()))
        }

        async fn delete(&self, _user_id: UserId) -> Result<(), KeyTokenStoreError> {
            Err(KeyTokenStoreError::Store("connection reset".to_string()))
        }
    }

    /// Reads pass through; writes fail while `fail_upserts` is set.
    #[derive(Default)]
    struct FlakyWriteStore {
        inner: MemoryKeyTokenStore,
        fail_upserts: AtomicBool,
    }

    #[async_trait::async_trait]
    impl KeyTokenStore for FlakyWriteStore {
        async fn upsert(
            &self,
            write: KeyTokenWrite,
            guard: WriteGuard,
        ) -> Result<KeyTokenRecord, KeyTokenStoreError> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(KeyTokenStoreError::Store("write timeout".to_string()));
            }
            self.inner.upsert(write, guard).await
        }

        async fn find(
            &self,
            user_id: UserId,
        ) -> Result<Option<KeyTokenRecord>, KeyTokenStoreError> {
            self.inner.find(user_id).await
        }

        async fn delete(&self, user_id: UserId) -> Result<(), KeyTokenStoreError> {
            self.inner.delete(user_id).await
        }
    }

    fn issuer() -> Arc<dyn TokenIssuer> {
        Arc::new(JwtTokenIssuer::new(JwtConfig {
            issuer: "keytoken.test".to_string(),
            audience: "shop-client".to_string(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            algorithm: SigningAlgorithm::Es384,
        }))
    }

    fn user() -> UserRecord {
        UserRecord {
            user_id: UserId::new_random(),
            name: "carol".to_string(),
            email: "carol@example.com".to_string(),
            password_hash: "hash".to_string(),
            cart_id: None,
            gender: None,
            avatar: None,
            account: None,
            address: None,
        }
    }

    #[tokio::test]
    async fn signing_failure_leaves_store_untouched() {
        let store = Arc::new(MemoryKeyTokenStore::default());
        let rotator = SessionRotator::new(
            store.clone(),
            Arc::new(MemoryUserRepo::default()),
            issuer(),
            Arc::new(FailingGenerator),
            RotationConfig::default(),
        );
        let user = user();

        let result = rotator.login(&user).await;
        assert!(matches!(result, Err(SessionError::Signing(_))));
        assert!(store.find(user.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_is_propagated() {
        let rotator = SessionRotator::new(
            Arc::new(BrokenStore),
            Arc::new(MemoryUserRepo::default()),
            issuer(),
            Arc::new(PemKeyPairGenerator::new(SigningAlgorithm::Es384)),
            RotationConfig::default(),
        );

        let result = rotator.login(&user()).await;
        match result {
            Err(SessionError::Store(message)) => assert_eq!(message, "connection reset"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_rotation_write_keeps_record_and_can_be_retried() {
        let store = Arc::new(FlakyWriteStore::default());
        let user = user();
        let rotator = SessionRotator::new(
            store.clone(),
            Arc::new(MemoryUserRepo::with_users([user.clone()])),
            issuer(),
            Arc::new(PemKeyPairGenerator::new(SigningAlgorithm::Es384)),
            RotationConfig::default(),
        );

        let tr1 = rotator.login(&user).await.unwrap().tokens.refresh_token;
        let before = store.find(user.user_id).await.unwrap().unwrap();

        store.fail_upserts.store(true, Ordering::SeqCst);
        match rotator.rotate(&tr1).await {
            Err(SessionError::Store(message)) => assert_eq!(message, "write timeout"),
            other => panic!("unexpected result: {other:?}"),
        }

        let after = store.find(user.user_id).await.unwrap().unwrap();
        assert_eq!(after.refresh_token, tr1);
        assert_eq!(after.key_pair, before.key_pair);
        assert!(after.used_refresh_tokens.is_empty());

        store.fail_upserts.store(false, Ordering::SeqCst);
        let grant = rotator.rotate(&tr1).await.unwrap();
        let record = store.find(user.user_id).await.unwrap().unwrap();
        assert_eq!(record.refresh_token, grant.tokens.refresh_token);
        assert!(record.is_retired(&tr1));
    }

    #[tokio::test]
    async fn garbage_refresh_token_is_not_found() {
        let rotator = SessionRotator::new(
            Arc::new(MemoryKeyTokenStore::default()),
            Arc::new(MemoryUserRepo::default()),
            issuer(),
            Arc::new(PemKeyPairGenerator::new(SigningAlgorithm::Es384)),
            RotationConfig::default(),
        );

        let result = rotator
            .rotate(&RefreshToken("definitely.not.ajwt".to_string()))
            .await;
        match result {
            Err(SessionError::AuthorizedFail(message)) => {
                assert_eq!(message, MSG_REFRESH_TOKEN_NOT_FOUND)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
