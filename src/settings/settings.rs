use crate::application_impl::{JwtConfig, RotationConfig, SigningAlgorithm};
use crate::domain_model::{RetentionPolicy, UserRecord};
use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: Log,
    pub storage: Storage,
    pub token: Token,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub backend: String, // "memory", "mysql" or "redis"
    #[serde(default)]
    pub mysql_dsn: Option<String>,
    #[serde(default)]
    pub redis_dsn: Option<String>,
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
}

fn default_redis_prefix() -> String {
    "keytoken".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_algorithm")]
    pub algorithm: SigningAlgorithm,
    #[serde(default)]
    pub rsa_bits: Option<usize>,
}

fn default_algorithm() -> SigningAlgorithm {
    SigningAlgorithm::Rs256
}

#[derive(Debug, Deserialize)]
pub struct Session {
    #[serde(default = "default_true")]
    pub rotate_keypair: bool,
    /// 0 keeps every retired token.
    #[serde(default)]
    pub max_retired_tokens: usize,
    #[serde(default)]
    pub prune_expired_retired: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Session {
    fn default() -> Self {
        Session {
            rotate_keypair: true,
            max_retired_tokens: 0,
            prune_expired_retired: false,
        }
    }
}

impl Token {
    pub fn jwt_config(&self) -> Result<JwtConfig> {
        if self.access_ttl_secs <= 0 || self.refresh_ttl_secs <= 0 {
            return Err(anyhow!("token TTLs must be positive"));
        }
        if self.access_ttl_secs > self.refresh_ttl_secs {
            return Err(anyhow!("access TTL must not exceed refresh TTL"));
        }

        Ok(JwtConfig {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            access_ttl: chrono::Duration::seconds(self.access_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(self.refresh_ttl_secs),
            algorithm: self.algorithm,
        })
    }
}

impl Session {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_retired: (self.max_retired_tokens > 0).then_some(self.max_retired_tokens),
            prune_expired: self.prune_expired_retired,
        }
    }

    pub fn rotation(&self) -> RotationConfig {
        RotationConfig {
            rotate_keypair: self.rotate_keypair,
        }
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(raw: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
[log]
filter = "info"

[storage]
backend = "memory"

[token]
issuer = "keytoken"
audience = "shop-client"
access_ttl_secs = 172800
refresh_ttl_secs = 604800
"#;

    #[test]
    fn session_defaults_keep_every_retired_token() {
        let settings = from_toml(MINIMAL);
        assert!(settings.session.rotate_keypair);
        assert_eq!(settings.session.retention(), RetentionPolicy::default());
        assert_eq!(settings.token.algorithm, SigningAlgorithm::Rs256);
        assert!(settings.users.is_empty());
        assert_eq!(settings.storage.redis_prefix, "keytoken");
    }

    #[test]
    fn retention_cap_and_seed_users() {
        let raw = format!(
            r#"{MINIMAL}
[session]
rotate_keypair = false
max_retired_tokens = 5
prune_expired_retired = true

[[users]]
user_id = "6f1c0d4e-8a55-4c8e-9a63-0b1f5c2d7e11"
name = "Ada"
email = "ada@example.com"
"#
        );
        let settings = from_toml(&raw);
        let retention = settings.session.retention();
        assert_eq!(retention.max_retired, Some(5));
        assert!(retention.prune_expired);
        assert!(!settings.session.rotation().rotate_keypair);
        assert_eq!(settings.users.len(), 1);
        assert_eq!(settings.users[0].email, "ada@example.com");
    }

    #[test]
    fn rejects_access_ttl_longer_than_refresh_ttl() {
        let raw = MINIMAL.replace("access_ttl_secs = 172800", "access_ttl_secs = 999999");
        assert!(from_toml(&raw).token.jwt_config().is_err());
    }
}
