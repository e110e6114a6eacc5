use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unique constraint violated")]
    Conflict,
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<RepoError> for crate::error::ApiError {
    fn from(err: RepoError) -> Self {
        crate::error::ApiError::Internal(err.into())
    }
}

/// Maps a unique-constraint violation to `RepoError::Conflict`.
pub fn map_unique(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
        _ => RepoError::Database(err),
    }
}

/// Escapes `%`, `_` and `\` so user input matches literally inside ILIKE.
pub fn like_pattern(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('%');
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")
}
