use serde_json::json;
use stampsync_core::{SyncResult, WalletSync};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub nonces: u64,
    pub notifications: u64,
}

impl ReapReport {
    pub fn to_json(self) -> serde_json::Value {
        json!({ "nonces": self.nonces, "notifications": self.notifications })
    }
}

/// Deletes callback nonces past retention and notification records that
/// left the rolling window. Reads already ignore both; this bounds growth.
pub async fn reap_ledgers(sync: &WalletSync) -> SyncResult<ReapReport> {
    let now = sync.clock.now();
    let nonce_cutoff = now - sync.policy.nonce_retention;
    let window_cutoff = now - sync.policy.google_notify_window;

    let nonces = sync.nonces.reap(nonce_cutoff).await?;
    let notifications = sync.notifications.reap(window_cutoff).await?;
    debug!(%nonce_cutoff, %window_cutoff, nonces, notifications, "reap finished");
    Ok(ReapReport {
        nonces,
        notifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampsync_core::clock::Clock;
    use stampsync_core::memory::MemoryHarness;
    use stampsync_core::types::{NotificationKind, NotificationRecord};

    fn record(at: chrono::DateTime<chrono::Utc>) -> NotificationRecord {
        NotificationRecord {
            customer_id: "cus_1".to_string(),
            object_id: "3388000000000001.cus_1".to_string(),
            kind: NotificationKind::Stamp,
            sent_at: at,
        }
    }

    #[tokio::test]
    async fn test_reap_removes_only_expired_entries() {
        let h = MemoryHarness::new();
        let now = h.clock.now();

        h.sync
            .nonces
            .record_if_absent("n_old", now - chrono::Duration::days(8))
            .await
            .unwrap();
        h.sync
            .nonces
            .record_if_absent("n_fresh", now - chrono::Duration::days(1))
            .await
            .unwrap();
        h.sync
            .notifications
            .record(&record(now - chrono::Duration::hours(25)))
            .await
            .unwrap();
        h.sync
            .notifications
            .record(&record(now - chrono::Duration::hours(2)))
            .await
            .unwrap();

        let report = reap_ledgers(&h.sync).await.unwrap();
        assert_eq!(
            report,
            ReapReport {
                nonces: 1,
                notifications: 1
            }
        );
        assert_eq!(h.store.nonce_count(), 1);
        assert_eq!(h.store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_reap_on_empty_ledgers() {
        let h = MemoryHarness::new();
        let report = reap_ledgers(&h.sync).await.unwrap();
        assert_eq!(report, ReapReport::default());
        assert_eq!(report.to_json()["nonces"], 0);
    }
}
