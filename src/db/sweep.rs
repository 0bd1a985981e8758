//! Background removal of expired sessions and verification records.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Store;

/// Rows removed per table on one tick; anything left waits for the next.
pub const PURGE_BATCH: i64 = 1000;

/// Purges on a fixed period until the returned handle is aborted. The
/// first pass runs immediately.
pub fn spawn_purge(store: Arc<dyn Store>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store
                .purge_expired(OffsetDateTime::now_utc(), PURGE_BATCH)
                .await
            {
                Ok(0) => debug!("no expired rows"),
                Ok(removed) => info!(removed, "expired sessions and verifications purged"),
                Err(e) => warn!(error = %e, "purge failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, NewSession, NewUser, NewVerification};
    use time::Duration as TimeDuration;

    #[tokio::test]
    async fn purge_task_clears_expired_sessions() {
        let store = Arc::new(MemoryStore::new());
        let now = OffsetDateTime::now_utc();
        let (user, _) = store
            .insert_user_with_verification(
                NewUser {
                    email: "a@example.com".into(),
                    name: "A".into(),
                    password_hash: "x".into(),
                },
                NewVerification {
                    identifier: "a@example.com".into(),
                    value: "v".into(),
                    expires_at: now + TimeDuration::hours(1),
                },
            )
            .await
            .unwrap();
        store
            .insert_session(NewSession {
                user_id: user.id,
                token: "stale".into(),
                expires_at: now - TimeDuration::minutes(5),
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap();

        let handle = spawn_purge(store.clone(), Duration::from_secs(3600));
        for _ in 0..100 {
            if store.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(store.session_count(), 0);
        assert_eq!(store.verification_count(), 1);
    }
}
