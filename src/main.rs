mod app;
mod auth;
mod config;
mod contacts;
mod db;
mod error;
mod extract;
mod mail;
#[cfg(test)]
mod memory;
mod rate_limit;
mod state;
mod storage;
mod users;
mod validation;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "contacts_api=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let (state, db) = AppState::init(config).await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let cleanup_secs = state.config.rate_limit.cleanup_interval;
    rate_limit::spawn_cleanup_task(state.rate_limiter.clone(), cleanup_secs);
    auth::revocation::spawn_cleanup_task(state.revocations.clone(), cleanup_secs);

    app::serve(app::build_app(state)).await
}
