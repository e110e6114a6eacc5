use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{Contact, ContactFilter, ContactPatch, NewContact, Page};
use crate::db::{like_pattern, map_unique, RepoResult};

const CONTACT_COLUMNS: &str = "id, owner_id, first_name, last_name, email, phone, birthday, note, created_at, updated_at";

/// Every method is scoped to `owner_id`; rows of other owners are invisible.
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Fails with `RepoError::Conflict` when the owner already has this email.
    async fn create(&self, owner_id: Uuid, contact: &NewContact) -> RepoResult<Contact>;
    async fn get(&self, owner_id: Uuid, id: Uuid) -> RepoResult<Option<Contact>>;
    async fn list(&self, owner_id: Uuid, filter: &ContactFilter, page: Page) -> RepoResult<Vec<Contact>>;
    async fn update(&self, owner_id: Uuid, id: Uuid, patch: &ContactPatch) -> RepoResult<Option<Contact>>;
    async fn delete(&self, owner_id: Uuid, id: Uuid) -> RepoResult<bool>;
    /// Contacts whose birthday `month * 100 + day` is one of `codes`.
    async fn with_birthday_codes(&self, owner_id: Uuid, codes: &[i32]) -> RepoResult<Vec<Contact>>;
}

pub struct PgContactRepository {
    pool: PgPool,
}

impl PgContactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for PgContactRepository {
    async fn create(&self, owner_id: Uuid, c: &NewContact) -> RepoResult<Contact> {
        sqlx::query_as::<_, Contact>(&format!(
            r#"
            INSERT INTO contacts (id, owner_id, first_name, last_name, email, phone, birthday, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(&c.first_name)
        .bind(&c.last_name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(c.birthday)
        .bind(&c.note)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique)
    }

    async fn get(&self, owner_id: Uuid, id: Uuid) -> RepoResult<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self, owner_id: Uuid, f: &ContactFilter, page: Page) -> RepoResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
              FROM contacts
             WHERE owner_id = $1
               AND ($2::text IS NULL OR first_name ILIKE $2)
               AND ($3::text IS NULL OR last_name ILIKE $3)
               AND ($4::text IS NULL OR lower(email) = lower($4))
               AND ($5::date IS NULL OR birthday >= $5)
               AND ($6::date IS NULL OR birthday <= $6)
             ORDER BY last_name, first_name, id
             LIMIT $7 OFFSET $8
            "#
        ))
        .bind(owner_id)
        .bind(f.first_name.as_deref().map(like_pattern))
        .bind(f.last_name.as_deref().map(like_pattern))
        .bind(f.email.as_deref())
        .bind(f.birthday_from)
        .bind(f.birthday_to)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update(&self, owner_id: Uuid, id: Uuid, p: &ContactPatch) -> RepoResult<Option<Contact>> {
        // one statement, so a dropped request cannot leave a half-applied patch
        sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts
               SET first_name = COALESCE($3, first_name),
                   last_name  = COALESCE($4, last_name),
                   email      = COALESCE($5, email),
                   phone      = COALESCE($6, phone),
                   birthday   = COALESCE($7, birthday),
                   note       = CASE WHEN $9 THEN $8 ELSE note END,
                   updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&p.first_name)
        .bind(&p.last_name)
        .bind(&p.email)
        .bind(&p.phone)
        .bind(p.birthday)
        .bind(p.note.clone().flatten())
        .bind(p.note.is_some())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique)
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM contacts WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn with_birthday_codes(&self, owner_id: Uuid, codes: &[i32]) -> RepoResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
              FROM contacts
             WHERE owner_id = $1
               AND (EXTRACT(MONTH FROM birthday)::int * 100 + EXTRACT(DAY FROM birthday)::int) = ANY($2)
            "#
        ))
        .bind(owner_id)
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
