use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use stampsync_core::{SyncResult, WalletSync};
use tracing::{info, warn};

pub fn retry_policy(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::from_secs(0),
        1 => Duration::from_secs(60),
        2 => Duration::from_secs(300),
        3 => Duration::from_secs(1800),
        4 => Duration::from_secs(7200),
        _ => Duration::from_secs(21600),
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    failures: u32,
    next_at: DateTime<Utc>,
}

/// Failed retries per design, so a design that keeps failing is retried on
/// the escalating schedule instead of every sweep.
#[derive(Debug, Default)]
pub struct RetryTracker {
    designs: HashMap<String, Attempts>,
}

impl RetryTracker {
    pub fn is_due(&self, design_id: &str, now: DateTime<Utc>) -> bool {
        self.designs
            .get(design_id)
            .map_or(true, |attempts| attempts.next_at <= now)
    }

    pub fn failures(&self, design_id: &str) -> u32 {
        self.designs.get(design_id).map_or(0, |a| a.failures)
    }

    /// Returns the wait before the next attempt.
    pub fn record_failure(&mut self, design_id: &str, now: DateTime<Utc>) -> Duration {
        let failures = self.failures(design_id) + 1;
        let delay = retry_policy(failures);
        let wait = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(6));
        self.designs.insert(
            design_id.to_string(),
            Attempts {
                failures,
                next_at: now + wait,
            },
        );
        delay
    }

    pub fn record_success(&mut self, design_id: &str) {
        self.designs.remove(design_id);
    }

    /// Forgets designs that are no longer stalled.
    pub fn retain_only(&mut self, stalled: &[String]) {
        self.designs.retain(|id, _| stalled.contains(id));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySweep {
    pub stalled: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub deferred: usize,
}

/// Retries every design left `regenerating` for longer than `stale_after`.
/// A regeneration that renders everything flips the design back to ready
/// and fans the new strips out.
pub async fn retry_stalled(
    sync: &WalletSync,
    tracker: &mut RetryTracker,
    stale_after: chrono::Duration,
) -> SyncResult<RetrySweep> {
    let now = sync.clock.now();
    let stalled = sync
        .designs
        .list_stalled_regenerations(now - stale_after)
        .await?;
    let ids: Vec<String> = stalled.iter().map(|d| d.id.clone()).collect();
    tracker.retain_only(&ids);

    let mut sweep = RetrySweep {
        stalled: stalled.len(),
        ..RetrySweep::default()
    };
    for design in stalled {
        if !tracker.is_due(&design.id, now) {
            sweep.deferred += 1;
            continue;
        }

        match sync.coordinator.retry_regeneration(&design.id).await {
            Ok(report) if report.cache.is_complete() => {
                info!(
                    design_id = %design.id,
                    rendered = report.cache.rendered,
                    generation = report.cache.generation,
                    "stalled regeneration completed"
                );
                tracker.record_success(&design.id);
                sweep.completed.push(design.id);
            }
            Ok(report) => {
                let delay = tracker.record_failure(&design.id, now);
                warn!(
                    design_id = %design.id,
                    failures = report.cache.failures.len(),
                    attempt = tracker.failures(&design.id),
                    ?delay,
                    "stalled regeneration still incomplete"
                );
                sweep.failed.push(design.id);
            }
            Err(err) => {
                let delay = tracker.record_failure(&design.id, now);
                warn!(
                    design_id = %design.id,
                    error = %err,
                    attempt = tracker.failures(&design.id),
                    ?delay,
                    "stalled regeneration failed"
                );
                sweep.failed.push(design.id);
            }
        }
    }
    Ok(sweep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampsync_core::clock::Clock;
    use stampsync_core::memory::{sample_design, MemoryHarness};
    use stampsync_core::types::StripStatus;

    fn stale(minutes: i64) -> chrono::Duration {
        chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_retry_policy_immediate_first_attempt() {
        assert_eq!(retry_policy(0), Duration::from_secs(0));
    }

    #[test]
    fn test_retry_policy_escalates() {
        assert_eq!(retry_policy(1), Duration::from_secs(60));
        assert_eq!(retry_policy(2), Duration::from_secs(300)); // 5 min
        assert_eq!(retry_policy(3), Duration::from_secs(1800)); // 30 min
        assert_eq!(retry_policy(4), Duration::from_secs(7200)); // 2 hours
    }

    #[test]
    fn test_retry_policy_caps_at_six_hours() {
        assert_eq!(retry_policy(5), Duration::from_secs(21600));
        assert_eq!(retry_policy(100), Duration::from_secs(21600));
    }

    #[test]
    fn test_tracker_defers_until_delay_passes() {
        let now = Utc::now();
        let mut tracker = RetryTracker::default();
        assert!(tracker.is_due("des_1", now), "unknown designs are due");

        let delay = tracker.record_failure("des_1", now);
        assert_eq!(delay, Duration::from_secs(60));
        assert!(!tracker.is_due("des_1", now + chrono::Duration::seconds(59)));
        assert!(tracker.is_due("des_1", now + chrono::Duration::seconds(60)));

        assert_eq!(tracker.record_failure("des_1", now), Duration::from_secs(300));
        assert_eq!(tracker.failures("des_1"), 2);

        tracker.record_success("des_1");
        assert_eq!(tracker.failures("des_1"), 0);
    }

    #[test]
    fn test_tracker_forgets_recovered_designs() {
        let now = Utc::now();
        let mut tracker = RetryTracker::default();
        tracker.record_failure("des_1", now);
        tracker.record_failure("des_2", now);
        tracker.retain_only(&["des_2".to_string()]);
        assert_eq!(tracker.failures("des_1"), 0);
        assert_eq!(tracker.failures("des_2"), 1);
    }

    fn stalled_design(h: &MemoryHarness) {
        h.store.seed_business("biz_1", "Bean There");
        let mut design = sample_design("des_1", "biz_1", 2);
        design.strip_status = StripStatus::Regenerating;
        design.updated_at = h.clock.now() - chrono::Duration::hours(2);
        h.store.seed_design(design);
    }

    #[tokio::test]
    async fn test_stalled_regeneration_is_retried_on_schedule() {
        let h = MemoryHarness::new();
        stalled_design(&h);
        let mut tracker = RetryTracker::default();

        h.renderer.fail_all(true);
        let sweep = retry_stalled(&h.sync, &mut tracker, stale(15)).await.unwrap();
        assert_eq!(sweep.failed, vec!["des_1".to_string()]);
        assert_eq!(
            h.store.design("des_1").unwrap().strip_status,
            StripStatus::Regenerating
        );

        h.renderer.heal();
        let sweep = retry_stalled(&h.sync, &mut tracker, stale(15)).await.unwrap();
        assert_eq!(sweep.deferred, 1, "second attempt waits a minute");
        assert!(sweep.completed.is_empty());

        h.clock.advance(chrono::Duration::seconds(61));
        let sweep = retry_stalled(&h.sync, &mut tracker, stale(15)).await.unwrap();
        assert_eq!(sweep.completed, vec!["des_1".to_string()]);
        let design = h.store.design("des_1").unwrap();
        assert_eq!(design.strip_status, StripStatus::Ready);
        assert_eq!(h.store.strip_entries("des_1").len(), 12);
    }

    #[tokio::test]
    async fn test_recent_regenerations_are_left_alone() {
        let h = MemoryHarness::new();
        h.store.seed_business("biz_1", "Bean There");
        let mut design = sample_design("des_1", "biz_1", 2);
        design.strip_status = StripStatus::Regenerating;
        design.updated_at = h.clock.now() - chrono::Duration::minutes(5);
        h.store.seed_design(design);

        let mut tracker = RetryTracker::default();
        let sweep = retry_stalled(&h.sync, &mut tracker, stale(15)).await.unwrap();
        assert_eq!(sweep, RetrySweep::default());
        assert_eq!(h.renderer.calls(), 0);
    }
}
