use std::sync::Arc;

use crate::auth::{
    jwt::JwtKeys,
    repo::{PgUserRepository, UserRepository},
    revocation::RevocationStore,
};
use crate::config::AppConfig;
use crate::contacts::repo::{ContactRepository, PgContactRepository};
use crate::mail::{LogMailer, Mailer, SmtpMailer};
use crate::rate_limit::RateLimiter;
use crate::storage::{ImageStore, Storage};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub users: Arc<dyn UserRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub storage: Arc<dyn ImageStore>,
    pub mailer: Arc<dyn Mailer>,
    pub revocations: Arc<RevocationStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, sqlx::PgPool)> {
        let config = Arc::new(config);
        let db = crate::db::connect(&config).await?;

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn ImageStore>;

        let mailer: Arc<dyn Mailer> = if config.mail.server.is_some() {
            Arc::new(SmtpMailer::new(&config.mail)?)
        } else {
            tracing::warn!("MAIL_SERVER not set; emails will be written to the log");
            Arc::new(LogMailer)
        };

        let state = Self {
            keys: JwtKeys::from_config(&config.jwt),
            users: Arc::new(PgUserRepository::new(db.clone())),
            contacts: Arc::new(PgContactRepository::new(db.clone())),
            storage,
            mailer,
            revocations: Arc::new(RevocationStore::new()),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            config,
        };
        Ok((state, db))
    }

    /// In-memory state for tests: no database, no SMTP, no S3.
    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with(AppConfig::for_tests()).0
    }

    /// Like `fake`, also handing back the mailer so tests can read sent mail.
    #[cfg(test)]
    pub fn fake_with(config: AppConfig) -> (Self, crate::memory::RecordingMailer) {
        use crate::memory::{FakeImageStore, InMemoryContacts, InMemoryUsers, RecordingMailer};

        let config = Arc::new(config);
        let outbox = RecordingMailer::default();
        let state = Self {
            keys: JwtKeys::from_config(&config.jwt),
            users: Arc::new(InMemoryUsers::default()),
            contacts: Arc::new(InMemoryContacts::default()),
            storage: Arc::new(FakeImageStore),
            mailer: Arc::new(outbox.clone()),
            revocations: Arc::new(RevocationStore::new()),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            config,
        };
        (state, outbox)
    }
}
