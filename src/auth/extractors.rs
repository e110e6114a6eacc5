use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use super::{claims::TokenPurpose, jwt::JwtKeys, roles::Role};
use crate::error::ApiError;

/// Identity taken from a valid access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let auth = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthenticated("Missing Authorization header"))?;

    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated("Authorization header must be 'Bearer <token>'"))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token, TokenPurpose::Access).map_err(|e| {
            warn!(error = %e, "access token rejected");
            ApiError::from(e)
        })?;
        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}
