//! Strip cache population, regeneration and invalidation

use std::sync::atomic::Ordering;

use crate::memory::{sample_design, MemoryHarness};
use crate::strips::artifact_path;
use crate::types::{CacheKey, Design, Platform, Resolution, StripStatus};

fn seeded(total_stamps: i32) -> (MemoryHarness, Design) {
    let harness = MemoryHarness::new();
    harness.store.seed_business("biz_1", "Bean There");
    let design = harness
        .store
        .seed_design(sample_design("des_1", "biz_1", total_stamps));
    (harness, design)
}

// ============================================================
// Population
// ============================================================

#[tokio::test]
async fn test_three_stamp_design_yields_sixteen_entries() {
    let (h, design) = seeded(3);

    let summary = h.sync.cache.ensure_populated(&design).await.unwrap();

    assert_eq!(summary.total_keys, 16);
    assert_eq!(summary.rendered, 16);
    assert!(summary.is_complete());
    assert_eq!(h.store.strip_entries("des_1").len(), 16);
    assert_eq!(h.storage.uploads(), 16);
}

#[tokio::test]
async fn test_lookup_succeeds_for_every_key_after_population() {
    let (h, design) = seeded(5);
    h.sync.cache.ensure_populated(&design).await.unwrap();

    for stamp_count in 0..=5 {
        for platform in Platform::ALL {
            for resolution in platform.resolutions() {
                let url = h
                    .sync
                    .cache
                    .lookup("des_1", stamp_count, platform, *resolution)
                    .await
                    .unwrap();
                assert!(
                    url.is_some(),
                    "missing {}/{}@{}",
                    platform,
                    stamp_count,
                    resolution
                );
            }
        }
    }
    assert!(h.sync.cache.is_complete(&design).await.unwrap());
}

#[tokio::test]
async fn test_ensure_populated_is_idempotent() {
    let (h, design) = seeded(4);
    h.sync.cache.ensure_populated(&design).await.unwrap();
    let renders = h.renderer.calls();
    let uploads = h.storage.uploads();

    let again = h.sync.cache.ensure_populated(&design).await.unwrap();

    assert_eq!(h.renderer.calls(), renders, "no re-render on a complete design");
    assert_eq!(h.storage.uploads(), uploads, "no re-upload on a complete design");
    assert_eq!(again.rendered, 0);
    assert_eq!(again.reused, again.total_keys);
}

#[tokio::test]
async fn test_failed_key_does_not_abort_population() {
    let (h, design) = seeded(3);
    let broken = CacheKey {
        stamp_count: 2,
        platform: Platform::Apple,
        resolution: Resolution::X2,
    };
    h.renderer.fail_key(broken);

    let summary = h.sync.cache.ensure_populated(&design).await.unwrap();

    assert_eq!(summary.rendered, 15, "every other key still renders");
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].key, broken);
    assert!(!summary.is_complete());
    assert_eq!(h.sync.cache.missing_keys(&design).await.unwrap(), vec![broken]);

    h.renderer.heal();
    let retry = h.sync.cache.ensure_populated(&design).await.unwrap();
    assert_eq!(retry.rendered, 1, "retry renders only the missing key");
    assert!(retry.is_complete());
}

#[tokio::test]
async fn test_upload_failures_are_collected() {
    let (h, design) = seeded(2);
    h.storage.fail_uploads.store(true, Ordering::SeqCst);

    let summary = h.sync.cache.ensure_populated(&design).await.unwrap();

    assert_eq!(summary.failures.len(), summary.total_keys);
    assert!(h.store.strip_entries("des_1").is_empty());
}

#[tokio::test]
async fn test_invalid_total_stamps_is_rejected() {
    let (h, mut design) = seeded(3);
    design.total_stamps = 0;

    assert!(h.sync.cache.ensure_populated(&design).await.is_err());
    assert_eq!(h.renderer.calls(), 0);
}

#[test]
fn test_artifact_paths() {
    let apple = CacheKey {
        stamp_count: 4,
        platform: Platform::Apple,
        resolution: Resolution::X3,
    };
    let google = CacheKey {
        stamp_count: 4,
        platform: Platform::Google,
        resolution: Resolution::Hero,
    };
    assert_eq!(
        artifact_path("biz_1", "des_1", 2, &apple),
        "biz_1/cards/des_1/strips/g2/apple/strip_4@3x.png"
    );
    assert_eq!(
        artifact_path("biz_1", "des_1", 2, &google),
        "biz_1/cards/des_1/strips/g2/google/hero_4.png"
    );
}

// ============================================================
// Regeneration and invalidation
// ============================================================

#[tokio::test]
async fn test_regenerate_swaps_generation() {
    let (h, design) = seeded(3);
    h.sync.cache.ensure_populated(&design).await.unwrap();
    let old_url = h
        .sync
        .cache
        .lookup("des_1", 1, Platform::Google, Resolution::Hero)
        .await
        .unwrap()
        .unwrap();

    let mut edited = design.clone();
    edited.style.background_color = "#112233".to_string();
    h.store.put_design(&edited);

    let summary = h.sync.cache.regenerate(&edited).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.generation, 2);
    assert_eq!(summary.invalidated, 16, "old generation dropped");
    assert_eq!(h.store.design("des_1").unwrap().strip_generation, 2);

    let new_url = h
        .sync
        .cache
        .lookup("des_1", 1, Platform::Google, Resolution::Hero)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(old_url, new_url);
    assert!(new_url.contains("/g2/"));
    assert_eq!(h.store.strip_entries("des_1").len(), 16);
    assert_eq!(h.storage.len(), 16, "old artifacts deleted from storage");
}

#[tokio::test]
async fn test_incomplete_regeneration_keeps_live_generation() {
    let (h, design) = seeded(2);
    h.sync.cache.ensure_populated(&design).await.unwrap();

    let mut edited = design.clone();
    edited.style.stamp_icon = "star".to_string();
    h.store.put_design(&edited);
    h.renderer.fail_key(CacheKey {
        stamp_count: 0,
        platform: Platform::Google,
        resolution: Resolution::Hero,
    });

    let summary = h.sync.cache.regenerate(&edited).await.unwrap();

    assert!(!summary.is_complete());
    assert_eq!(h.store.design("des_1").unwrap().strip_generation, 1);
    for stamp_count in 0..=2 {
        assert!(
            h.sync
                .cache
                .lookup("des_1", stamp_count, Platform::Google, Resolution::Hero)
                .await
                .unwrap()
                .is_some(),
            "old strips keep serving while regeneration is incomplete"
        );
    }

    h.renderer.heal();
    let calls_before = h.renderer.calls();
    let resumed = h.sync.cache.regenerate(&edited).await.unwrap();
    assert!(resumed.is_complete());
    assert_eq!(h.renderer.calls() - calls_before, 1, "resume renders the gap only");
    assert_eq!(h.store.design("des_1").unwrap().strip_generation, 2);
}

#[tokio::test]
async fn test_stale_style_entries_are_not_reused() {
    let (h, design) = seeded(2);
    h.sync.cache.ensure_populated(&design).await.unwrap();

    let mut recoloured = design.clone();
    recoloured.style.background_color = "#000000".to_string();
    h.store.put_design(&recoloured);

    assert_eq!(
        h.sync.cache.missing_keys(&recoloured).await.unwrap().len(),
        12,
        "entries rendered for the old colours do not count"
    );
}

#[tokio::test]
async fn test_invalidate_removes_everything() {
    let (h, design) = seeded(3);
    h.sync.cache.ensure_populated(&design).await.unwrap();

    let removed = h.sync.cache.invalidate("des_1").await.unwrap();

    assert_eq!(removed, 16);
    assert!(h.store.strip_entries("des_1").is_empty());
    assert!(h.storage.is_empty());
    assert!(h
        .sync
        .cache
        .lookup("des_1", 0, Platform::Apple, Resolution::X1)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        h.store.design("des_1").unwrap().strip_status,
        StripStatus::Ready,
        "invalidate does not touch the status flag"
    );
}
