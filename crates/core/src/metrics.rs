use once_cell::sync::Lazy;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Outcome, Platform};

#[derive(Default)]
struct PlatformCounters {
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Default)]
pub struct Metrics {
    apple: PlatformCounters,
    google: PlatformCounters,
    callbacks_processed: AtomicU64,
    callbacks_duplicate: AtomicU64,
    strips_rendered: AtomicU64,
    strips_failed: AtomicU64,
    regenerations_completed: AtomicU64,
    regenerations_failed: AtomicU64,
    http_responses: [AtomicU64; 5],
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::default);

impl Metrics {
    fn platform(&self, platform: Platform) -> &PlatformCounters {
        match platform {
            Platform::Apple => &self.apple,
            Platform::Google => &self.google,
        }
    }

    pub fn record_sync(&self, platform: Platform, outcome: &Outcome) {
        let counters = self.platform(platform);
        counters
            .updated
            .fetch_add(u64::from(outcome.updated), Ordering::Relaxed);
        counters
            .skipped
            .fetch_add(u64::from(outcome.skipped), Ordering::Relaxed);
        counters
            .failed
            .fetch_add(u64::from(outcome.failed), Ordering::Relaxed);
    }

    pub fn record_callback(&self, duplicate: bool) {
        if duplicate {
            self.callbacks_duplicate.fetch_add(1, Ordering::Relaxed);
        } else {
            self.callbacks_processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_strips(&self, rendered: usize, failed: usize) {
        self.strips_rendered
            .fetch_add(rendered as u64, Ordering::Relaxed);
        self.strips_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_regeneration(&self, completed: bool) {
        if completed {
            self.regenerations_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.regenerations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_http_response(&self, status: u16) {
        let class = usize::from(status / 100).clamp(1, 5) - 1;
        self.http_responses[class].fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition.
    pub fn gather(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# TYPE stampsync_sync_total counter");
        for platform in Platform::ALL {
            let counters = self.platform(platform);
            for (status, value) in [
                ("updated", &counters.updated),
                ("skipped", &counters.skipped),
                ("failed", &counters.failed),
            ] {
                let _ = writeln!(
                    out,
                    "stampsync_sync_total{{platform=\"{}\",status=\"{}\"}} {}",
                    platform,
                    status,
                    value.load(Ordering::Relaxed)
                );
            }
        }

        let scalars = [
            ("stampsync_callbacks_processed_total", &self.callbacks_processed),
            ("stampsync_callbacks_duplicate_total", &self.callbacks_duplicate),
            ("stampsync_strips_rendered_total", &self.strips_rendered),
            ("stampsync_strips_failed_total", &self.strips_failed),
            ("stampsync_regenerations_completed_total", &self.regenerations_completed),
            ("stampsync_regenerations_failed_total", &self.regenerations_failed),
        ];
        for (name, value) in scalars {
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value.load(Ordering::Relaxed));
        }
        let _ = writeln!(out, "# TYPE stampsync_http_responses_total counter");
        for (index, value) in self.http_responses.iter().enumerate() {
            let _ = writeln!(
                out,
                "stampsync_http_responses_total{{class=\"{}xx\"}} {}",
                index + 1,
                value.load(Ordering::Relaxed)
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_platform_series() {
        let metrics = Metrics::default();
        metrics.record_sync(Platform::Google, &Outcome::updated(2));
        metrics.record_sync(Platform::Apple, &Outcome::failed(1));
        metrics.record_callback(true);

        let text = metrics.gather();
        assert!(text.contains("stampsync_sync_total{platform=\"google\",status=\"updated\"} 2"));
        assert!(text.contains("stampsync_sync_total{platform=\"apple\",status=\"failed\"} 1"));
        assert!(text.contains("stampsync_callbacks_duplicate_total 1"));
        assert!(text.contains("stampsync_callbacks_processed_total 0"));
    }

    #[test]
    fn test_http_responses_grouped_by_class() {
        let metrics = Metrics::default();
        metrics.record_http_response(200);
        metrics.record_http_response(204);
        metrics.record_http_response(503);

        let text = metrics.gather();
        assert!(text.contains("stampsync_http_responses_total{class=\"2xx\"} 2"));
        assert!(text.contains("stampsync_http_responses_total{class=\"5xx\"} 1"));
        assert!(text.contains("stampsync_http_responses_total{class=\"4xx\"} 0"));
    }
}
