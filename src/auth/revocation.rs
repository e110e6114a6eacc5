use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Revoked refresh-token ids, kept until the token would have expired anyway.
#[derive(Debug, Default)]
pub struct RevocationStore {
    revoked: DashMap<Uuid, i64>,
}

impl RevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `jti` revoked. Returns `false` if it already was, so callers can
    /// treat a successful revoke as consuming the token exactly once.
    pub fn revoke(&self, jti: Uuid, exp: i64) -> bool {
        self.revoked.insert(jti, exp).is_none()
    }

    pub fn is_revoked(&self, jti: Uuid) -> bool {
        self.revoked.contains_key(&jti)
    }

    pub fn purge_expired(&self, now: i64) {
        self.revoked.retain(|_, exp| *exp >= now);
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }
}

pub fn spawn_cleanup_task(store: Arc<RevocationStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            store.purge_expired(OffsetDateTime::now_utc().unix_timestamp());
            tracing::debug!(entries = store.len(), "revocation store cleanup complete");
        }
    });
}
