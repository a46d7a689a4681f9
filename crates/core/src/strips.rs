//! Pre-rendered strip images, one per (stamp count, platform, resolution).
//!
//! Entries live under a generation number. Regeneration fills `g + 1`
//! beside the live generation, promotes it, then drops `g`, so lookups
//! never observe a half-written set.

use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{within, SyncResult};
use crate::metrics::METRICS;
use crate::ports::{DesignStore, ObjectStorage, Renderer, StripStore};
use crate::types::{
    CacheEntry, CacheKey, CacheSummary, Design, KeyFailure, Platform, Resolution,
};

pub fn artifact_path(business_id: &str, design_id: &str, generation: i32, key: &CacheKey) -> String {
    let file = match key.platform {
        Platform::Apple => format!("strip_{}@{}.png", key.stamp_count, key.resolution),
        Platform::Google => format!("hero_{}.png", key.stamp_count),
    };
    format!(
        "{}/cards/{}/strips/g{}/{}/{}",
        business_id, design_id, generation, key.platform, file
    )
}

pub struct StripImageCache {
    strips: Arc<dyn StripStore>,
    designs: Arc<dyn DesignStore>,
    renderer: Arc<dyn Renderer>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
    remote_timeout: Duration,
    render_concurrency: usize,
}

impl StripImageCache {
    pub fn new(
        strips: Arc<dyn StripStore>,
        designs: Arc<dyn DesignStore>,
        renderer: Arc<dyn Renderer>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
        remote_timeout: Duration,
        render_concurrency: usize,
    ) -> Self {
        Self {
            strips,
            designs,
            renderer,
            storage,
            clock,
            remote_timeout,
            render_concurrency: render_concurrency.max(1),
        }
    }

    /// Renders every key of the live generation that has no entry for the
    /// design's current style. Keys already present are never re-rendered.
    pub async fn ensure_populated(&self, design: &Design) -> SyncResult<CacheSummary> {
        design.validate()?;
        self.populate(design, design.strip_generation).await
    }

    /// Builds the next generation next to the live one and swaps it in once
    /// every key rendered. An incomplete run leaves the live generation
    /// untouched; calling again resumes the same target generation.
    pub async fn regenerate(&self, design: &Design) -> SyncResult<CacheSummary> {
        design.validate()?;
        let live = design.strip_generation;
        let target = live + 1;

        let mut summary = self.populate(design, target).await?;
        if !summary.is_complete() {
            warn!(
                design_id = %design.id,
                generation = target,
                failures = summary.failures.len(),
                "regeneration incomplete, keeping live strips"
            );
            return Ok(summary);
        }

        self.designs
            .promote_strip_generation(&design.id, target)
            .await?;
        summary.invalidated = self.drop_entries(
            &design.id,
            self.strips.delete_generation(&design.id, live).await?,
        )
        .await;

        info!(
            design_id = %design.id,
            generation = target,
            invalidated = summary.invalidated,
            "strip generation promoted"
        );
        Ok(summary)
    }

    /// Removes every generation of the design along with the stored
    /// artifacts. Returns how many entries went away.
    pub async fn invalidate(&self, design_id: &str) -> SyncResult<usize> {
        let deleted = self.strips.delete_all(design_id).await?;
        Ok(self.drop_entries(design_id, deleted).await)
    }

    /// The live generation's URL for one key. Both store reads run under
    /// the remote deadline since adapters call this on every sync.
    pub async fn lookup(
        &self,
        design_id: &str,
        stamp_count: i32,
        platform: Platform,
        resolution: Resolution,
    ) -> SyncResult<Option<String>> {
        let design = within(self.remote_timeout, self.designs.get_design(design_id)).await?;
        let key = CacheKey {
            stamp_count,
            platform,
            resolution,
        };
        let entry = within(
            self.remote_timeout,
            self.strips.get_entry(design_id, design.strip_generation, &key),
        )
        .await?;
        Ok(entry.map(|e| e.url))
    }

    pub async fn missing_keys(&self, design: &Design) -> SyncResult<Vec<CacheKey>> {
        let present = self.present_keys(design, design.strip_generation).await?;
        Ok(design
            .key_space()
            .into_iter()
            .filter(|key| !present.contains(key))
            .collect())
    }

    pub async fn is_complete(&self, design: &Design) -> SyncResult<bool> {
        Ok(self.missing_keys(design).await?.is_empty())
    }

    /// Keys with an entry rendered from the design's current style.
    async fn present_keys(&self, design: &Design, generation: i32) -> SyncResult<HashSet<CacheKey>> {
        let fingerprint = design.render_fingerprint();
        Ok(self
            .strips
            .list_entries(&design.id, generation)
            .await?
            .into_iter()
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.key)
            .collect())
    }

    async fn populate(&self, design: &Design, generation: i32) -> SyncResult<CacheSummary> {
        let keys = design.key_space();
        let present = self.present_keys(design, generation).await?;
        let missing: Vec<CacheKey> = keys
            .iter()
            .filter(|key| !present.contains(key))
            .copied()
            .collect();

        let mut summary = CacheSummary::new(&design.id, generation, keys.len());
        summary.reused = keys.len() - missing.len();

        if missing.is_empty() {
            debug!(design_id = %design.id, generation, "strip cache already complete");
            return Ok(summary);
        }

        let fingerprint = design.render_fingerprint();
        let fingerprint = fingerprint.as_str();
        let pending: Vec<_> = missing
            .into_iter()
            .map(|key| async move {
                let result = self.materialize(design, generation, key, fingerprint).await;
                (key, result)
            })
            .collect();
        let results: Vec<(CacheKey, SyncResult<()>)> = stream::iter(pending)
            .buffer_unordered(self.render_concurrency)
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(()) => summary.rendered += 1,
                Err(err) => {
                    warn!(
                        design_id = %design.id,
                        business_id = %design.business_id,
                        generation,
                        key = %key,
                        error = %err,
                        "strip render failed"
                    );
                    summary.failures.push(KeyFailure {
                        key,
                        error: err.to_string(),
                    });
                }
            }
        }
        summary.failures.sort_by_key(|failure| failure.key);

        METRICS.record_strips(summary.rendered, summary.failures.len());
        info!(
            design_id = %design.id,
            generation,
            rendered = summary.rendered,
            reused = summary.reused,
            failed = summary.failures.len(),
            "strip cache populated"
        );
        Ok(summary)
    }

    async fn materialize(
        &self,
        design: &Design,
        generation: i32,
        key: CacheKey,
        fingerprint: &str,
    ) -> SyncResult<()> {
        let bytes = within(
            self.remote_timeout,
            self.renderer
                .render(design, key.stamp_count, key.platform, key.resolution),
        )
        .await?;

        let path = artifact_path(&design.business_id, &design.id, generation, &key);
        let url = within(
            self.remote_timeout,
            self.storage.upload(&path, bytes, "image/png"),
        )
        .await?;

        self.strips
            .upsert_entry(&CacheEntry {
                design_id: design.id.clone(),
                generation,
                key,
                fingerprint: fingerprint.to_string(),
                path,
                url,
                created_at: self.clock.now(),
            })
            .await
    }

    /// Rows are already gone; artifact cleanup failures only leave orphans
    /// in the bucket, so they are logged and not raised.
    async fn drop_entries(&self, design_id: &str, entries: Vec<CacheEntry>) -> usize {
        if entries.is_empty() {
            return 0;
        }
        let paths: Vec<String> = entries.iter().map(|entry| entry.path.clone()).collect();
        if let Err(err) = within(self.remote_timeout, self.storage.delete(&paths)).await {
            warn!(
                design_id = %design_id,
                artifacts = paths.len(),
                error = %err,
                "failed to delete strip artifacts"
            );
        }
        entries.len()
    }
}
