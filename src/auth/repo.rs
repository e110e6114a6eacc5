use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{repo_types::User, roles::Role};
use crate::db::{map_unique, RepoError, RepoResult};

const USER_COLUMNS: &str =
    "id, email, password_hash, role, is_verified, avatar_url, token_version, created_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;
    /// Fails with `RepoError::Conflict` when the email is taken.
    async fn create(&self, email: &str, password_hash: &str) -> RepoResult<User>;
    /// Returns `false` if the user was already verified (or does not exist).
    async fn mark_verified(&self, id: Uuid) -> RepoResult<bool>;
    /// Stores a new hash and bumps `token_version`, but only if the version
    /// still equals `expected_version`.
    async fn reset_password(
        &self,
        id: Uuid,
        expected_version: i32,
        password_hash: &str,
    ) -> RepoResult<bool>;
    async fn update_avatar(&self, id: Uuid, url: &str) -> RepoResult<Option<User>>;
    async fn set_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>>;
    async fn list(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>>;
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, email: &str, password_hash: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique)
    }

    async fn mark_verified(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET is_verified = TRUE, updated_at = now() WHERE id = $1 AND is_verified = FALSE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn reset_password(
        &self,
        id: Uuid,
        expected_version: i32,
        password_hash: &str,
    ) -> RepoResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $3,
                   token_version = token_version + 1,
                   updated_at = now()
             WHERE id = $1 AND token_version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_avatar(&self, id: Uuid, url: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET avatar_url = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(rows)
    }
}
