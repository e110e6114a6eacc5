use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::{
    claims::{Claims, TokenPurpose},
    repo_types::User,
    roles::Role,
};
use crate::{config::JwtConfig, state::AppState};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("expected a {expected:?} token, got {found:?}")]
    PurposeMismatch {
        expected: TokenPurpose,
        found: TokenPurpose,
    },
    #[error("jwt signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Who a token is issued to.
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject {
    pub id: Uuid,
    pub role: Role,
    pub version: i32,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            version: user.token_version,
        }
    }
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    email_ttl: Duration,
    reset_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.ttl_minutes),
            refresh_ttl: Duration::minutes(cfg.refresh_ttl_minutes),
            email_ttl: Duration::minutes(cfg.email_ttl_minutes),
            reset_ttl: Duration::minutes(cfg.reset_ttl_minutes),
        }
    }

    pub fn issue(
        &self,
        subject: TokenSubject,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_at(subject, purpose, ttl, OffsetDateTime::now_utc())
    }

    fn issue_at(
        &self,
        subject: TokenSubject,
        purpose: TokenPurpose,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.id,
            role: subject.role,
            purpose,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            ver: subject.version,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %subject.id, purpose = ?purpose, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user: &User) -> Result<String, TokenError> {
        self.issue(user.into(), TokenPurpose::Access, self.access_ttl)
    }
    pub fn sign_refresh(&self, user: &User) -> Result<String, TokenError> {
        self.issue(user.into(), TokenPurpose::Refresh, self.refresh_ttl)
    }
    pub fn sign_email_verification(&self, user: &User) -> Result<String, TokenError> {
        self.issue(user.into(), TokenPurpose::VerifyEmail, self.email_ttl)
    }
    pub fn sign_password_reset(&self, user: &User) -> Result<String, TokenError> {
        self.issue(user.into(), TokenPurpose::ResetPassword, self.reset_ttl)
    }

    /// Checks signature, issuer, audience, expiry (no leeway) and purpose.
    pub fn verify(&self, token: &str, expected: TokenPurpose) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;

        if data.claims.purpose != expected {
            return Err(TokenError::PurposeMismatch {
                expected,
                found: data.claims.purpose,
            });
        }
        debug!(user_id = %data.claims.sub, purpose = ?expected, "jwt verified");
        Ok(data.claims)
    }
}
