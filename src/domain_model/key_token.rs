use super::{RefreshToken, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// PEM-encoded signing keypair owned by a single user session.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A refresh token that has been rotated away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredToken {
    pub token: RefreshToken,
    pub expires_at: DateTime<Utc>,
}

/// How many retired refresh tokens a record keeps for reuse detection.
///
/// The default keeps every one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionPolicy {
    /// Keep at most this many of the most recent retired tokens. `None` keeps all.
    pub max_retired: Option<usize>,
    /// Drop retired tokens whose own expiry has passed.
    pub prune_expired: bool,
}

impl RetentionPolicy {
    pub fn apply(&self, retired: &mut Vec<RetiredToken>, now: DateTime<Utc>) {
        if self.prune_expired {
            retired.retain(|t| t.expires_at > now);
        }
        if let Some(max) = self.max_retired {
            if retired.len() > max {
                let excess = retired.len() - max;
                retired.drain(..excess);
            }
        }
    }
}

/// Per-user state backing refresh rotation and reuse detection.
#[derive(Debug, Clone)]
pub struct KeyTokenRecord {
    pub user_id: UserId,
    pub key_pair: KeyPair,
    pub refresh_token: RefreshToken,
    pub refresh_expires_at: DateTime<Utc>,
    /// Oldest first.
    pub used_refresh_tokens: Vec<RetiredToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyTokenRecord {
    pub fn new(
        user_id: UserId,
        key_pair: KeyPair,
        refresh_token: RefreshToken,
        refresh_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        KeyTokenRecord {
            user_id,
            key_pair,
            refresh_token,
            refresh_expires_at,
            used_refresh_tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_current(&self, token: &RefreshToken) -> bool {
        self.refresh_token == *token
    }

    pub fn is_retired(&self, token: &RefreshToken) -> bool {
        self.used_refresh_tokens.iter().any(|t| t.token == *token)
    }

    /// Moves the current token into the retired list and installs the new
    /// keypair and token in its place.
    pub fn archive_and_replace(
        &mut self,
        key_pair: KeyPair,
        refresh_token: RefreshToken,
        refresh_expires_at: DateTime<Utc>,
        retention: &RetentionPolicy,
        now: DateTime<Utc>,
    ) {
        let previous = std::mem::replace(&mut self.refresh_token, refresh_token);
        let previous_expires_at =
            std::mem::replace(&mut self.refresh_expires_at, refresh_expires_at);
        self.used_refresh_tokens.push(RetiredToken {
            token: previous,
            expires_at: previous_expires_at,
        });
        self.key_pair = key_pair;
        self.updated_at = now;
        retention.apply(&mut self.used_refresh_tokens, now);
    }
}
