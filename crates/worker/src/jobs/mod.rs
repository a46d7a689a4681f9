pub mod reaper;
pub mod regeneration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use stampsync_core::{SyncResult, WalletSync};
use std::time::Duration;
use tracing::{error, info};

use self::regeneration::RetryTracker;

/// How often stalled regenerations are looked for.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Schedule {
    pub reap_every: chrono::Duration,
    pub stale_after: chrono::Duration,
}

/// State carried between sweeps of the maintenance loop.
pub struct Maintenance {
    sync: WalletSync,
    schedule: Schedule,
    tracker: RetryTracker,
    last_reap: Option<DateTime<Utc>>,
}

impl Maintenance {
    pub fn new(sync: WalletSync, schedule: Schedule) -> Self {
        Self {
            sync,
            schedule,
            tracker: RetryTracker::default(),
            last_reap: None,
        }
    }

    /// One pass: reap when due, then retry stalled regenerations.
    pub async fn sweep(&mut self) -> SyncResult<()> {
        let now = self.sync.clock.now();
        let reap_due = self
            .last_reap
            .map_or(true, |last| now - last >= self.schedule.reap_every);
        if reap_due {
            let report = reaper::reap_ledgers(&self.sync).await?;
            info!(
                nonces = report.nonces,
                notifications = report.notifications,
                "ledgers reaped"
            );
            self.last_reap = Some(now);
        }

        regeneration::retry_stalled(&self.sync, &mut self.tracker, self.schedule.stale_after)
            .await?;
        Ok(())
    }

    /// Sweeps until ctrl-c. Failed sweeps back off exponentially.
    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            let delay = match self.sweep().await {
                Ok(()) => {
                    backoff.reset();
                    SWEEP_INTERVAL
                }
                Err(err) => {
                    let delay = backoff.next_backoff().unwrap_or(SWEEP_INTERVAL);
                    error!(error = %err, ?delay, "maintenance sweep failed");
                    delay
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampsync_core::clock::Clock;
    use stampsync_core::memory::MemoryHarness;

    fn schedule() -> Schedule {
        Schedule {
            reap_every: chrono::Duration::hours(1),
            stale_after: chrono::Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn test_reap_runs_once_per_interval() {
        let h = MemoryHarness::new();
        let mut maintenance = Maintenance::new(h.sync.clone(), schedule());

        let old = h.clock.now() - chrono::Duration::days(30);
        h.sync.nonces.record_if_absent("n_old", old).await.unwrap();
        maintenance.sweep().await.unwrap();
        assert_eq!(h.store.nonce_count(), 0);

        h.sync.nonces.record_if_absent("n_old_2", old).await.unwrap();
        h.clock.advance(chrono::Duration::minutes(10));
        maintenance.sweep().await.unwrap();
        assert_eq!(h.store.nonce_count(), 1, "reap is not due yet");

        h.clock.advance(chrono::Duration::hours(1));
        maintenance.sweep().await.unwrap();
        assert_eq!(h.store.nonce_count(), 0);
    }
}
