use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, RefreshClaims, TokenKind};
use crate::config::TokenConfig;
use crate::users::repo_types::User;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("jwt expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        }
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Keys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signs and verifies access and refresh tokens, each with its own secret.
#[derive(Clone)]
pub struct TokenIssuer {
    access: Arc<Keys>,
    refresh: Arc<Keys>,
    issuer: String,
    audience: String,
}

impl TokenIssuer {
    pub fn new(cfg: &TokenConfig) -> Self {
        Self {
            access: Arc::new(Keys::new(&cfg.access_secret, cfg.access_ttl)),
            refresh: Arc::new(Keys::new(&cfg.refresh_secret, cfg.refresh_ttl)),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    fn window(ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn issue_access_token(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.access.ttl);
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.access.encoding)?;
        debug!(user_id = %user.id, kind = ?TokenKind::Access, "jwt signed");
        Ok(token)
    }

    pub fn issue_refresh_token(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.refresh.ttl);
        let claims = RefreshClaims {
            sub: user.id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh.encoding)?;
        debug!(user_id = %user.id, kind = ?TokenKind::Refresh, "jwt signed");
        Ok(token)
    }

    fn verify<C: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<C, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        Ok(decode::<C>(token, key, &validation)?.claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.verify(token, &self.access.decoding)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::Invalid("not an access token".into()));
        }
        debug!(user_id = %claims.sub, "access jwt verified");
        Ok(claims)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.verify(token, &self.refresh.decoding)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::Invalid("not a refresh token".into()));
        }
        debug!(user_id = %claims.sub, "refresh jwt verified");
        Ok(claims)
    }
}
