//! Postgres-backed storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stampsync_core::auth::generate_id;
use stampsync_core::ports::{DesignStore, NonceLedger, RegistrationStore, StripStore};
use stampsync_core::types::{
    Business, CacheEntry, CacheKey, Customer, Design, Platform, StripStatus,
};
use stampsync_core::{SyncError, SyncResult};
use tracing::debug;

use crate::models::{StripStatusKind, WalletPlatform};
use crate::queries::{customers, designs, nonces, registrations, strips};
use crate::storage_error;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn require_design(&self, id: &str) -> SyncResult<()> {
        match designs::get_by_id(&self.pool, id)
            .await
            .map_err(storage_error)?
        {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(format!("design {}", id))),
        }
    }
}

fn not_found_unless(affected: u64, what: String) -> SyncResult<()> {
    if affected == 0 {
        return Err(SyncError::NotFound(what));
    }
    Ok(())
}

#[async_trait]
impl DesignStore for PgStore {
    async fn get_design(&self, id: &str) -> SyncResult<Design> {
        designs::get_by_id(&self.pool, id)
            .await
            .map_err(storage_error)?
            .map(Design::from)
            .ok_or_else(|| SyncError::NotFound(format!("design {}", id)))
    }

    async fn get_active_design(&self, business_id: &str) -> SyncResult<Option<Design>> {
        Ok(designs::get_active(&self.pool, business_id)
            .await
            .map_err(storage_error)?
            .map(Design::from))
    }

    async fn get_customer(&self, id: &str) -> SyncResult<Customer> {
        customers::get_customer(&self.pool, id)
            .await
            .map_err(storage_error)?
            .map(Customer::from)
            .ok_or_else(|| SyncError::NotFound(format!("customer {}", id)))
    }

    async fn get_business(&self, id: &str) -> SyncResult<Business> {
        customers::get_business(&self.pool, id)
            .await
            .map_err(storage_error)?
            .map(Business::from)
            .ok_or_else(|| SyncError::NotFound(format!("business {}", id)))
    }

    async fn begin_regeneration(&self, design_id: &str) -> SyncResult<bool> {
        if designs::begin_regeneration(&self.pool, design_id)
            .await
            .map_err(storage_error)?
        {
            return Ok(true);
        }
        // nothing updated: either already regenerating or no such design
        self.require_design(design_id).await?;
        debug!(design_id, "regeneration already claimed");
        Ok(false)
    }

    async fn set_strip_status(&self, design_id: &str, status: StripStatus) -> SyncResult<()> {
        let affected = designs::set_strip_status(&self.pool, design_id, StripStatusKind::from(status))
            .await
            .map_err(storage_error)?;
        not_found_unless(affected, format!("design {}", design_id))
    }

    async fn promote_strip_generation(&self, design_id: &str, generation: i32) -> SyncResult<()> {
        let affected = designs::set_strip_generation(&self.pool, design_id, generation)
            .await
            .map_err(storage_error)?;
        not_found_unless(affected, format!("design {}", design_id))
    }

    async fn activate_design(&self, business_id: &str, design_id: &str) -> SyncResult<Design> {
        designs::activate(&self.pool, business_id, design_id)
            .await
            .map_err(storage_error)?
            .map(Design::from)
            .ok_or_else(|| SyncError::NotFound(format!("design {}", design_id)))
    }

    async fn list_stalled_regenerations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> SyncResult<Vec<Design>> {
        Ok(designs::list_stalled(&self.pool, updated_before)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(Design::from)
            .collect())
    }
}

#[async_trait]
impl StripStore for PgStore {
    async fn list_entries(&self, design_id: &str, generation: i32) -> SyncResult<Vec<CacheEntry>> {
        strips::list_for_generation(&self.pool, design_id, generation)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(CacheEntry::try_from)
            .collect()
    }

    async fn get_entry(
        &self,
        design_id: &str,
        generation: i32,
        key: &CacheKey,
    ) -> SyncResult<Option<CacheEntry>> {
        strips::get(
            &self.pool,
            design_id,
            generation,
            key.stamp_count,
            WalletPlatform::from(key.platform),
            key.resolution.as_str(),
        )
        .await
        .map_err(storage_error)?
        .map(CacheEntry::try_from)
        .transpose()
    }

    async fn upsert_entry(&self, entry: &CacheEntry) -> SyncResult<()> {
        strips::upsert(
            &self.pool,
            &entry.design_id,
            entry.generation,
            entry.key.stamp_count,
            WalletPlatform::from(entry.key.platform),
            entry.key.resolution.as_str(),
            &entry.fingerprint,
            &entry.path,
            &entry.url,
            entry.created_at,
        )
        .await
        .map_err(storage_error)
    }

    async fn delete_generation(
        &self,
        design_id: &str,
        generation: i32,
    ) -> SyncResult<Vec<CacheEntry>> {
        strips::delete_generation(&self.pool, design_id, generation)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(CacheEntry::try_from)
            .collect()
    }

    async fn delete_all(&self, design_id: &str) -> SyncResult<Vec<CacheEntry>> {
        strips::delete_all(&self.pool, design_id)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(CacheEntry::try_from)
            .collect()
    }
}

#[async_trait]
impl RegistrationStore for PgStore {
    async fn insert_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
        device_library_id: Option<&str>,
    ) -> SyncResult<bool> {
        registrations::insert(
            &self.pool,
            &generate_id("reg"),
            customer_id,
            WalletPlatform::from(platform),
            handle,
            device_library_id,
        )
        .await
        .map_err(storage_error)
    }

    async fn delete_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
    ) -> SyncResult<bool> {
        registrations::delete(&self.pool, customer_id, WalletPlatform::from(platform), handle)
            .await
            .map_err(storage_error)
    }

    async fn delete_device(&self, customer_id: &str, device_library_id: &str) -> SyncResult<bool> {
        registrations::delete_device(&self.pool, customer_id, device_library_id)
            .await
            .map_err(storage_error)
    }

    async fn list_handles(&self, customer_id: &str, platform: Platform) -> SyncResult<Vec<String>> {
        Ok(
            registrations::list_for_customer(&self.pool, customer_id, WalletPlatform::from(platform))
                .await
                .map_err(storage_error)?
                .into_iter()
                .map(|row| row.handle)
                .collect(),
        )
    }

    async fn list_for_business(
        &self,
        business_id: &str,
        platform: Platform,
    ) -> SyncResult<Vec<(String, String)>> {
        registrations::list_for_business(&self.pool, business_id, WalletPlatform::from(platform))
            .await
            .map_err(storage_error)
    }
}

#[async_trait]
impl NonceLedger for PgStore {
    async fn record_if_absent(&self, nonce: &str, at: DateTime<Utc>) -> SyncResult<bool> {
        nonces::record_if_absent(&self.pool, nonce, at)
            .await
            .map_err(storage_error)
    }

    async fn release(&self, nonce: &str) -> SyncResult<()> {
        nonces::release(&self.pool, nonce)
            .await
            .map_err(storage_error)
    }

    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        nonces::delete_older_than(&self.pool, older_than)
            .await
            .map_err(storage_error)
    }
}
