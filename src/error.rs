use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::jwt::TokenError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Client-visible failure. Every variant renders a stable `error` code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    DuplicateEmail(&'static str),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not verified")]
    NotVerified,

    #[error("{0}")]
    InvalidToken(&'static str),

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token cannot be used for this operation")]
    PurposeMismatch,

    #[error("Insufficient privileges")]
    Forbidden,

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Rate limit exceeded. Try again in {retry_after} seconds.")]
    RateLimited { retry_after: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::DuplicateEmail(_) => "duplicate_email",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::NotVerified => "email_not_verified",
            ApiError::InvalidToken(_) => "invalid_token",
            ApiError::ExpiredToken => "expired_token",
            ApiError::PurposeMismatch => "purpose_mismatch",
            ApiError::Forbidden => "forbidden",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Validation(_) => "validation_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::DuplicateEmail(_) => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::InvalidToken(_)
            | ApiError::ExpiredToken
            | ApiError::PurposeMismatch
            | ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotVerified | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => ApiError::InvalidToken("Invalid token"),
            TokenError::Expired => ApiError::ExpiredToken,
            TokenError::PurposeMismatch { .. } => ApiError::PurposeMismatch,
            TokenError::Signing(e) => ApiError::Internal(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // internals stay in the log
        let message = match &self {
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": code, "message": message }))).into_response();

        match self {
            ApiError::Unauthenticated(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            ApiError::RateLimited { retry_after } => {
                if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, v);
                }
            }
            _ => {}
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let (status, body) =
            body_json(ApiError::Internal(anyhow::anyhow!("connection refused: db-host:5432"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("db-host"));
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let res = ApiError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[tokio::test]
    async fn unauthenticated_and_forbidden_are_distinct() {
        let unauth = ApiError::Unauthenticated("Missing Authorization header").into_response();
        assert_eq!(unauth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unauth.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

        let (status, body) = body_json(ApiError::Forbidden).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }
}
