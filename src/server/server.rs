use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use sqlx::{MySql, Pool};
use std::sync::Arc;

pub struct Server {
    pub session_service: Arc<dyn SessionService>,
    pub user_repo: Arc<dyn UserRepo>,
    pub key_token_store: Arc<dyn KeyTokenStore>,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let retention = settings.session.retention();
        let jwt_config = settings.token.jwt_config()?;

        let mut pool = None;
        let (key_token_store, user_repo): (Arc<dyn KeyTokenStore>, Arc<dyn UserRepo>) =
            match settings.storage.backend.as_str() {
                "memory" => (
                    Arc::new(MemoryKeyTokenStore::new(retention)),
                    Arc::new(MemoryUserRepo::with_users(settings.users.iter().cloned())),
                ),
                "mysql" => {
                    let dsn = settings
                        .storage
                        .mysql_dsn
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("storage.mysql_dsn is required"))?;
                    let mysql = Pool::<MySql>::connect(dsn).await?;
                    pool = Some(mysql.clone());
                    (
                        Arc::new(MySqlKeyTokenStore::new(mysql.clone(), retention)),
                        Arc::new(MySqlUserRepo::new(mysql)),
                    )
                }
                "redis" => {
                    let dsn = settings
                        .storage
                        .redis_dsn
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("storage.redis_dsn is required"))?;
                    let redis_client = redis::Client::open(dsn)?;
                    let redis_manager = redis_client.get_connection_manager().await?;
                    // Users still come from settings; Redis only holds sessions.
                    (
                        Arc::new(RedisKeyTokenStore::new(
                            redis_manager,
                            settings.storage.redis_prefix.clone(),
                            retention,
                        )),
                        Arc::new(MemoryUserRepo::with_users(settings.users.iter().cloned())),
                    )
                }
                other => return Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
            };

        let mut generator = PemKeyPairGenerator::new(jwt_config.algorithm);
        if let Some(bits) = settings.token.rsa_bits {
            generator = generator.with_rsa_bits(bits);
        }
        let key_pair_generator: Arc<dyn KeyPairGenerator> = Arc::new(generator);
        let token_issuer: Arc<dyn TokenIssuer> = Arc::new(JwtTokenIssuer::new(jwt_config));

        let session_service: Arc<dyn SessionService> = Arc::new(SessionRotator::new(
            key_token_store.clone(),
            user_repo.clone(),
            token_issuer,
            key_pair_generator,
            settings.session.rotation(),
        ));

        info!(
            backend = %settings.storage.backend,
            algorithm = %settings.token.algorithm,
            "server started"
        );

        Ok(Self {
            session_service,
            user_repo,
            key_token_store,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
