use crate::domain_model::*;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("token malformed")]
    Malformed,
    #[error("token signature invalid")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("expected {expected} token")]
    WrongKind { expected: TokenKind },
}

#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Sign an access/refresh pair carrying `payload` with `key_pair`.
    async fn issue(&self, payload: &TokenPayload, key_pair: &KeyPair)
    -> Result<TokenPair, TokenError>;

    /// Read the claims without checking signature or expiry. Only good for
    /// finding out which stored key to verify with.
    fn decode_unverified(&self, token: &str) -> Result<TokenClaims, TokenError>;

    async fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        public_key: &str,
    ) -> Result<TokenClaims, TokenError>;
}

#[async_trait::async_trait]
pub trait KeyPairGenerator: Send + Sync {
    async fn generate(&self) -> Result<KeyPair, TokenError>;
}
