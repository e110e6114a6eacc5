use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, patch},
    Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{dto::ListUsersQuery, services};
use crate::{
    auth::{
        dto::{PublicUser, RoleRequest},
        extractors::AuthUser,
        roles::{authorize_current, Role},
    },
    error::{ApiError, ApiResult},
    extract::{Json, Path, Query},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me))
}

pub fn avatar_routes() -> Router<AppState> {
    Router::new()
        .route("/users/avatar", patch(update_avatar))
        // headroom for multipart framing on top of the file itself
        .layer(DefaultBodyLimit::max(services::MAX_AVATAR_BYTES + 64 * 1024))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/role", patch(set_role))
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<PublicUser>> {
    Ok(Json(services::me(&state, user.id).await?))
}

/// PATCH /users/avatar (multipart, field `file`)
#[instrument(skip(state, mp))]
pub async fn update_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<PublicUser>> {
    let mut mp = mp?;
    while let Some(field) = mp.next_field().await.map_err(|e| {
        warn!(error = %e, "bad multipart body");
        ApiError::validation(e.body_text())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?;
        let updated = services::update_avatar(&state, user.id, data, &content_type).await?;
        return Ok(Json(updated));
    }
    Err(ApiError::validation("Multipart field 'file' is required"))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListUsersQuery>,
) -> ApiResult<Json<Vec<PublicUser>>> {
    authorize_current(&state, &user, Role::Admin).await?;
    Ok(Json(services::list_users(&state, q.limit, q.offset).await?))
}

#[instrument(skip(state, body))]
pub async fn set_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleRequest>,
) -> ApiResult<Json<PublicUser>> {
    authorize_current(&state, &user, Role::Admin).await?;
    Ok(Json(services::set_role(&state, id, body.role).await?))
}
