use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            EmailRequest, LoginRequest, MessageResponse, PublicUser, RefreshRequest,
            ResetPasswordRequest, SignupRequest, TokenResponse,
        },
        services,
    },
    error::ApiResult,
    extract::{Json, Path},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/verify-email/:token", get(verify_email))
        .route("/auth/request-email", post(request_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", post(reset_password))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<PublicUser>)> {
    let user = services::signup(&state, &payload.email, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(services::login(&state, &payload.email, &payload.password).await?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(services::refresh(&state, &payload.refresh_token).await?))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<StatusCode> {
    services::logout(&state, &payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, token))]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    services::verify_email(&state, &token).await?;
    Ok(Json(MessageResponse {
        message: "Email confirmed",
    }))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn request_email(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    services::request_verification_email(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "If the account exists and is unverified, a confirmation email has been sent",
    }))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    services::request_password_reset(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "If the account exists, a password reset email has been sent",
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    services::reset_password(&state, &token, &payload.password).await?;
    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}
