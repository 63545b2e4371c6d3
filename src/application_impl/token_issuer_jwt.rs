use super::SigningAlgorithm;
use crate::application_port::{TokenError, TokenIssuer};
use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub algorithm: SigningAlgorithm,
}

/// Signs tokens with whichever per-user keypair it is handed.
pub struct JwtTokenIssuer {
    cfg: JwtConfig,
}

impl JwtTokenIssuer {
    pub fn new(cfg: JwtConfig) -> Self {
        JwtTokenIssuer { cfg }
    }

    #[inline]
    fn gen_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn encoding_key(&self, private_pem: &str) -> Result<EncodingKey, TokenError> {
        let key = match self.cfg.algorithm {
            SigningAlgorithm::Rs256 => EncodingKey::from_rsa_pem(private_pem.as_bytes()),
            SigningAlgorithm::Es384 => EncodingKey::from_ec_pem(private_pem.as_bytes()),
        };
        key.map_err(|e| TokenError::Signing(format!("invalid private key: {e}")))
    }

    fn decoding_key(&self, public_pem: &str) -> Result<DecodingKey, TokenError> {
        let key = match self.cfg.algorithm {
            SigningAlgorithm::Rs256 => DecodingKey::from_rsa_pem(public_pem.as_bytes()),
            SigningAlgorithm::Es384 => DecodingKey::from_ec_pem(public_pem.as_bytes()),
        };
        key.map_err(|_| TokenError::InvalidSignature)
    }

    fn encode_claims(
        &self,
        payload: &TokenPayload,
        kind: TokenKind,
        ttl: Duration,
        key: &EncodingKey,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let iat_dt = Utc::now();
        let exp_dt = iat_dt + ttl;
        let claims = TokenClaims {
            user_id: payload.user_id,
            email: payload.email.clone(),
            kind,
            jti: Self::gen_jti(),
            iat: iat_dt.timestamp(),
            exp: exp_dt.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
        };
        let token = encode(
            &Header::new(self.cfg.algorithm.to_jwt_algorithm()),
            &claims,
            key,
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, exp_dt))
    }
}

#[async_trait::async_trait]
impl TokenIssuer for JwtTokenIssuer {
    async fn issue(
        &self,
        payload: &TokenPayload,
        key_pair: &KeyPair,
    ) -> Result<TokenPair, TokenError> {
        let key = self.encoding_key(&key_pair.private_key)?;
        let (access_token, access_exp) =
            self.encode_claims(payload, TokenKind::Access, self.cfg.access_ttl, &key)?;
        let (refresh_token, refresh_exp) =
            self.encode_claims(payload, TokenKind::Refresh, self.cfg.refresh_ttl, &key)?;

        Ok(TokenPair {
            access_token: AccessToken(access_token),
            refresh_token: RefreshToken(refresh_token),
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }

    fn decode_unverified(&self, token: &str) -> Result<TokenClaims, TokenError> {
        // No key is involved, so the header's algorithm does not matter here.
        jsonwebtoken::dangerous::insecure_decode::<TokenClaims>(token)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Malformed)
    }

    async fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        public_key: &str,
    ) -> Result<TokenClaims, TokenError> {
        let key = self.decoding_key(public_key)?;
        let mut v = Validation::new(self.cfg.algorithm.to_jwt_algorithm());
        v.validate_exp = true;
        v.set_audience(&[self.cfg.audience.clone()]);
        v.set_issuer(&[self.cfg.issuer.clone()]);
        let data = decode::<TokenClaims>(token, &key, &v).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                TokenError::Malformed
            }
            _ => TokenError::InvalidSignature,
        })?;

        if data.claims.kind != kind {
            return Err(TokenError::WrongKind { expected: kind });
        }
        Ok(data.claims)
    }
}
