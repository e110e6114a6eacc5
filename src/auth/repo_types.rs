use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::roles::Role;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub role: Role,
    pub is_verified: bool,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub token_version: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
