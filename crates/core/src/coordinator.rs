//! Turns domain events into cache work and wallet updates.
//!
//! Per design: `ready -> regenerating -> ready`. The status flag is flipped
//! with a compare-and-set on the design row; inside this process a per-design
//! lock additionally keeps activation from racing a running regeneration.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::PlatformAdapter;
use crate::error::{within, SyncError, SyncResult};
use crate::metrics::METRICS;
use crate::ports::DesignStore;
use crate::registry::DeviceRegistry;
use crate::strips::StripImageCache;
use crate::types::{
    Business, CacheSummary, Customer, Design, FanoutSummary, Outcome, Platform, PlatformOutcomes,
    StripStatus, WalletReferences,
};

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationReport {
    pub design_id: String,
    pub cache: CacheSummary,
    pub template: Option<Outcome>,
    pub fanout: Option<FanoutSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub design: Design,
    pub population: Option<CacheSummary>,
    pub template: Option<Outcome>,
    pub fanout: Option<FanoutSummary>,
}

/// Handle on a background regeneration. Dropping it does not cancel the
/// work.
#[derive(Debug)]
pub struct RegenerationTicket {
    pub design_id: String,
    handle: JoinHandle<SyncResult<RegenerationReport>>,
}

impl RegenerationTicket {
    pub async fn wait(self) -> SyncResult<RegenerationReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(SyncError::InvariantViolation(format!(
                "regeneration task for design {} died: {}",
                self.design_id, err
            ))),
        }
    }
}

#[derive(Debug)]
pub enum DesignUpdate {
    /// No rendering-affecting field changed; cache and customers untouched.
    Unchanged,
    /// Inactive design, regenerated before returning.
    Regenerated(RegenerationReport),
    /// Active design, regenerating on the pool.
    Scheduled(RegenerationTicket),
    /// A regeneration already holds the design. It re-reads the design when
    /// it finishes and picks this edit up.
    AlreadyRegenerating,
}

#[derive(Clone)]
pub struct PassCoordinator {
    designs: Arc<dyn DesignStore>,
    cache: Arc<StripImageCache>,
    registry: DeviceRegistry,
    apple: PlatformAdapter,
    google: PlatformAdapter,
    regeneration_pool: Arc<Semaphore>,
    design_locks: LockMap,
    fanout_concurrency: usize,
    store_timeout: Duration,
}

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive hold on one design. The last holder removes the map entry.
struct DesignGuard {
    design_id: String,
    locks: LockMap,
    _held: OwnedMutexGuard<()>,
}

impl Drop for DesignGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // two references left: the map's and the one inside `_held`
        if locks
            .get(&self.design_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.design_id);
        }
    }
}

impl PassCoordinator {
    pub fn new(
        designs: Arc<dyn DesignStore>,
        cache: Arc<StripImageCache>,
        registry: DeviceRegistry,
        apple: PlatformAdapter,
        google: PlatformAdapter,
        regeneration_workers: usize,
        fanout_concurrency: usize,
        store_timeout: Duration,
    ) -> Self {
        Self {
            designs,
            cache,
            registry,
            apple,
            google,
            regeneration_pool: Arc::new(Semaphore::new(regeneration_workers.max(1))),
            design_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            fanout_concurrency: fanout_concurrency.max(1),
            store_timeout,
        }
    }

    pub fn adapter(&self, platform: Platform) -> &PlatformAdapter {
        match platform {
            Platform::Apple => &self.apple,
            Platform::Google => &self.google,
        }
    }

    pub async fn get_wallet_references(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
    ) -> WalletReferences {
        let stamps = customer.stamps.clamp(0, design.total_stamps);
        let mut references = WalletReferences::default();
        for adapter in [&self.apple, &self.google] {
            let reference = match adapter
                .build_save_reference(customer, business, design, stamps)
                .await
            {
                Ok(reference) => Some(reference),
                Err(err) => {
                    warn!(
                        customer_id = %customer.id,
                        business_id = %business.id,
                        platform = %adapter.platform(),
                        error = %err,
                        "failed to build save reference"
                    );
                    None
                }
            };
            match adapter.platform() {
                Platform::Apple => references.apple = reference,
                Platform::Google => references.google = reference,
            }
        }
        references
    }

    pub async fn on_customer_created(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
    ) -> SyncResult<WalletReferences> {
        ensure_same_business(business, design)?;
        Ok(self.get_wallet_references(customer, business, design).await)
    }

    /// Both platforms run concurrently; a failure on one never affects the
    /// other or the caller. Only an out-of-range stamp count is an error.
    pub async fn on_stamp_changed(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        new_stamp_count: i32,
    ) -> SyncResult<PlatformOutcomes> {
        ensure_same_business(business, design)?;
        if customer.business_id != business.id {
            return Err(SyncError::InvariantViolation(format!(
                "customer {} does not belong to business {}",
                customer.id, business.id
            )));
        }
        design.check_stamp_count(new_stamp_count)?;

        let (apple, google) = tokio::join!(
            self.apple
                .sync_state(customer, business, design, new_stamp_count),
            self.google
                .sync_state(customer, business, design, new_stamp_count),
        );
        let outcomes = PlatformOutcomes { apple, google };
        info!(
            customer_id = %customer.id,
            business_id = %business.id,
            design_id = %design.id,
            stamps = new_stamp_count,
            apple = ?outcomes.apple.status(),
            google = ?outcomes.google.status(),
            "stamp change synchronised"
        );
        Ok(outcomes)
    }

    /// Populates synchronously; nobody holds the design yet.
    pub async fn on_design_created(
        &self,
        business: &Business,
        design: &Design,
    ) -> SyncResult<CacheSummary> {
        ensure_same_business(business, design)?;
        let summary = self.cache.ensure_populated(design).await?;
        let status = if summary.is_complete() {
            StripStatus::Ready
        } else {
            StripStatus::Regenerating
        };
        within(self.store_timeout, self.designs.set_strip_status(&design.id, status)).await?;
        Ok(summary)
    }

    /// Called after the edit is stored. `before` is the design as it was.
    pub async fn on_design_updated(
        &self,
        business: &Business,
        before: &Design,
        after: &Design,
    ) -> SyncResult<DesignUpdate> {
        ensure_same_business(business, after)?;
        if before.id != after.id {
            return Err(SyncError::InvariantViolation(format!(
                "design update compares {} with {}",
                before.id, after.id
            )));
        }
        after.validate()?;

        if !before.rendering_differs(after) {
            debug!(design_id = %after.id, "edit does not affect strips");
            return Ok(DesignUpdate::Unchanged);
        }
        if !within(self.store_timeout, self.designs.begin_regeneration(&after.id)).await? {
            info!(design_id = %after.id, "regeneration already running");
            return Ok(DesignUpdate::AlreadyRegenerating);
        }

        if !after.is_active {
            let report = self
                .run_regeneration(business.clone(), after.id.clone(), false)
                .await?;
            return Ok(DesignUpdate::Regenerated(report));
        }

        let this = self.clone();
        let business = business.clone();
        let design_id = after.id.clone();
        let handle = tokio::spawn(async move { this.run_regeneration(business, design_id, true).await });
        info!(design_id = %after.id, "regeneration scheduled");
        Ok(DesignUpdate::Scheduled(RegenerationTicket {
            design_id: after.id.clone(),
            handle,
        }))
    }

    pub async fn on_design_activated(
        &self,
        business: &Business,
        design: &Design,
    ) -> SyncResult<ActivationReport> {
        ensure_same_business(business, design)?;

        let guard = self.lock_design(&design.id).await;

        let current = within(self.store_timeout, self.designs.get_design(&design.id)).await?;
        current.validate()?;

        let mut population = None;
        let missing = self.cache.missing_keys(&current).await?;
        if !missing.is_empty() {
            warn!(
                design_id = %current.id,
                missing = missing.len(),
                "strips incomplete at activation, populating first"
            );
            let summary = self.cache.ensure_populated(&current).await?;
            if !summary.is_complete() {
                return Err(SyncError::InvariantViolation(format!(
                    "design {} cannot be activated with {} strip images missing",
                    current.id,
                    summary.failures.len()
                )));
            }
            if current.strip_status == StripStatus::Regenerating {
                within(
                    self.store_timeout,
                    self.designs.set_strip_status(&current.id, StripStatus::Ready),
                )
                .await?;
            }
            population = Some(summary);
        }

        let active = within(
            self.store_timeout,
            self.designs.activate_design(&business.id, &current.id),
        )
        .await?;
        drop(guard);
        info!(business_id = %business.id, design_id = %active.id, "design activated");

        let template = self.google.sync_template(business, &active).await;
        let fanout = self.fan_out(business, &active).await;
        Ok(ActivationReport {
            design: active,
            population,
            template,
            fanout,
        })
    }

    pub async fn on_design_deleted(&self, business: &Business, design: &Design) -> SyncResult<usize> {
        ensure_same_business(business, design)?;
        if design.is_active {
            return Err(SyncError::InvariantViolation(format!(
                "design {} is active and cannot be deleted",
                design.id
            )));
        }
        let _guard = self.lock_design(&design.id).await;
        let removed = self.cache.invalidate(&design.id).await?;
        info!(design_id = %design.id, removed, "strip cache invalidated");
        Ok(removed)
    }

    /// Picks up a design left `regenerating` by an earlier failure.
    pub async fn retry_regeneration(&self, design_id: &str) -> SyncResult<RegenerationReport> {
        let design = within(self.store_timeout, self.designs.get_design(design_id)).await?;
        let business = within(self.store_timeout, self.designs.get_business(&design.business_id)).await?;
        if design.strip_status == StripStatus::Ready {
            // forced run from maintenance tooling
            within(self.store_timeout, self.designs.begin_regeneration(design_id)).await?;
        }
        self.run_regeneration(business, design.id.clone(), design.is_active)
            .await
    }

    /// Re-synchronises every customer with a registration on either
    /// platform, `fanout_concurrency` customers at a time.
    pub async fn notify_business(
        &self,
        business: &Business,
        design: &Design,
    ) -> SyncResult<FanoutSummary> {
        let customer_ids = within(
            self.store_timeout,
            self.registry.customers_for_business(&business.id),
        )
        .await?;
        let customers = customer_ids.len();

        let pending: Vec<_> = customer_ids
            .iter()
            .map(|customer_id| self.notify_customer(customer_id, business, design))
            .collect();
        let results: Vec<PlatformOutcomes> = stream::iter(pending)
            .buffer_unordered(self.fanout_concurrency)
            .collect()
            .await;

        let mut summary = FanoutSummary {
            customers,
            ..FanoutSummary::default()
        };
        for outcome in results {
            summary.outcomes.merge(outcome);
        }
        info!(
            business_id = %business.id,
            design_id = %design.id,
            customers,
            apple_failed = summary.outcomes.apple.failed,
            google_failed = summary.outcomes.google.failed,
            "fan-out complete"
        );
        Ok(summary)
    }

    async fn notify_customer(
        &self,
        customer_id: &str,
        business: &Business,
        design: &Design,
    ) -> PlatformOutcomes {
        let customer = match within(self.store_timeout, self.designs.get_customer(customer_id)).await {
            Ok(customer) => customer,
            Err(err) => {
                warn!(customer_id, business_id = %business.id, error = %err, "fan-out customer lookup failed");
                return PlatformOutcomes {
                    apple: Outcome::failed(1),
                    google: Outcome::failed(1),
                };
            }
        };
        if customer.stamps > design.total_stamps {
            warn!(
                customer_id,
                design_id = %design.id,
                stamps = customer.stamps,
                total_stamps = design.total_stamps,
                "customer holds more stamps than the design allows, showing a full card"
            );
        }
        let (apple, google) = tokio::join!(
            self.apple.notify(&customer, business, design),
            self.google.notify(&customer, business, design),
        );
        PlatformOutcomes { apple, google }
    }

    async fn fan_out(&self, business: &Business, design: &Design) -> Option<FanoutSummary> {
        match self.notify_business(business, design).await {
            Ok(summary) => Some(summary),
            Err(err) => {
                error!(business_id = %business.id, design_id = %design.id, error = %err, "fan-out failed");
                None
            }
        }
    }

    async fn lock_design(&self, design_id: &str) -> DesignGuard {
        let lock = self
            .design_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(design_id.to_string())
            .or_default()
            .clone();
        DesignGuard {
            design_id: design_id.to_string(),
            locks: self.design_locks.clone(),
            _held: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.design_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn run_regeneration(
        &self,
        business: Business,
        design_id: String,
        fan_out: bool,
    ) -> SyncResult<RegenerationReport> {
        let _permit = self
            .regeneration_pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Shutdown)?;
        let guard = self.lock_design(&design_id).await;

        let mut snapshot = within(self.store_timeout, self.designs.get_design(&design_id)).await?;
        let cache = loop {
            let summary = match self.cache.regenerate(&snapshot).await {
                Ok(summary) => summary,
                Err(err) => {
                    METRICS.record_regeneration(false);
                    error!(design_id = %design_id, error = %err, "regeneration failed");
                    return Err(err);
                }
            };
            if !summary.is_complete() {
                METRICS.record_regeneration(false);
                warn!(
                    design_id = %design_id,
                    failures = summary.failures.len(),
                    "regeneration incomplete, design stays regenerating"
                );
                return Ok(RegenerationReport {
                    design_id,
                    cache: summary,
                    template: None,
                    fanout: None,
                });
            }

            let current = within(self.store_timeout, self.designs.get_design(&design_id)).await?;
            let edited_meanwhile = snapshot.rendering_differs(&current);
            snapshot = current;
            if !edited_meanwhile {
                break summary;
            }
            info!(design_id = %design_id, "design edited during regeneration, rendering again");
        };

        within(
            self.store_timeout,
            self.designs.set_strip_status(&design_id, StripStatus::Ready),
        )
        .await?;
        drop(guard);
        METRICS.record_regeneration(true);

        let (template, fanout) = if fan_out && snapshot.is_active {
            let template = self.google.sync_template(&business, &snapshot).await;
            (template, self.fan_out(&business, &snapshot).await)
        } else {
            (None, None)
        };
        Ok(RegenerationReport {
            design_id,
            cache,
            template,
            fanout,
        })
    }
}

fn ensure_same_business(business: &Business, design: &Design) -> SyncResult<()> {
    if design.business_id != business.id {
        return Err(SyncError::InvariantViolation(format!(
            "design {} does not belong to business {}",
            design.id, business.id
        )));
    }
    Ok(())
}
