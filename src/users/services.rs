use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{dto::PublicUser, roles::Role},
    contacts::services::page,
    error::{ApiError, ApiResult},
    state::AppState,
    storage::ext_from_mime,
};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

pub async fn me(st: &AppState, user_id: Uuid) -> ApiResult<PublicUser> {
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(user.into())
}

/// Stores the image under a per-user key, replacing any previous avatar.
pub async fn update_avatar(
    st: &AppState,
    user_id: Uuid,
    body: Bytes,
    content_type: &str,
) -> ApiResult<PublicUser> {
    let Some(ext) = ext_from_mime(content_type) else {
        warn!(%user_id, content_type, "avatar rejected: not an image");
        return Err(ApiError::validation("Avatar must be a JPEG, PNG, WebP, GIF or HEIC image"));
    };
    if body.is_empty() {
        return Err(ApiError::validation("Avatar file is empty"));
    }
    if body.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::validation("Avatar exceeds 5 MiB"));
    }

    let key = format!("avatars/{user_id}.{ext}");
    let url = st.storage.upload(&key, body, content_type).await?;
    let user = st
        .users
        .update_avatar(user_id, &url)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    info!(%user_id, %key, "avatar updated");
    Ok(user.into())
}

pub async fn list_users(st: &AppState, limit: i64, offset: i64) -> ApiResult<Vec<PublicUser>> {
    let page = page(limit, offset)?;
    let users = st.users.list(page.limit, page.offset).await?;
    Ok(users.into_iter().map(PublicUser::from).collect())
}

pub async fn set_role(st: &AppState, user_id: Uuid, role: Role) -> ApiResult<PublicUser> {
    let user = st
        .users
        .set_role(user_id, role)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    info!(%user_id, role = ?role, "role changed");
    Ok(user.into())
}
