//! Seams to the collaborators this crate does not own: record storage,
//! rendering, object storage and the two wallet providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SyncResult;
use crate::types::{
    Business, CacheEntry, CacheKey, Customer, Design, NotificationRecord, Platform, Resolution,
    StripStatus,
};

#[async_trait]
pub trait DesignStore: Send + Sync {
    async fn get_design(&self, id: &str) -> SyncResult<Design>;
    async fn get_active_design(&self, business_id: &str) -> SyncResult<Option<Design>>;
    async fn get_customer(&self, id: &str) -> SyncResult<Customer>;
    async fn get_business(&self, id: &str) -> SyncResult<Business>;

    /// Compare-and-set `ready -> regenerating`. `false` means another
    /// regeneration already holds the design.
    async fn begin_regeneration(&self, design_id: &str) -> SyncResult<bool>;
    async fn set_strip_status(&self, design_id: &str, status: StripStatus) -> SyncResult<()>;
    async fn promote_strip_generation(&self, design_id: &str, generation: i32) -> SyncResult<()>;

    /// Deactivates whatever design is active for the business and activates
    /// `design_id` in one write.
    async fn activate_design(&self, business_id: &str, design_id: &str) -> SyncResult<Design>;
    async fn list_stalled_regenerations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> SyncResult<Vec<Design>>;
}

#[async_trait]
pub trait StripStore: Send + Sync {
    async fn list_entries(&self, design_id: &str, generation: i32) -> SyncResult<Vec<CacheEntry>>;
    async fn get_entry(
        &self,
        design_id: &str,
        generation: i32,
        key: &CacheKey,
    ) -> SyncResult<Option<CacheEntry>>;
    /// Last write wins for an existing key.
    async fn upsert_entry(&self, entry: &CacheEntry) -> SyncResult<()>;
    async fn delete_generation(&self, design_id: &str, generation: i32)
        -> SyncResult<Vec<CacheEntry>>;
    async fn delete_all(&self, design_id: &str) -> SyncResult<Vec<CacheEntry>>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        design: &Design,
        stamp_count: i32,
        platform: Platform,
        resolution: Resolution,
    ) -> SyncResult<Vec<u8>>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the bytes at `path`, overwriting, and returns the public URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> SyncResult<String>;
    async fn delete(&self, paths: &[String]) -> SyncResult<()>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Returns `true` when the handle was not registered before.
    async fn insert_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
        device_library_id: Option<&str>,
    ) -> SyncResult<bool>;
    async fn delete_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
    ) -> SyncResult<bool>;
    async fn delete_device(&self, customer_id: &str, device_library_id: &str) -> SyncResult<bool>;
    async fn list_handles(&self, customer_id: &str, platform: Platform)
        -> SyncResult<Vec<String>>;
    async fn list_for_business(
        &self,
        business_id: &str,
        platform: Platform,
    ) -> SyncResult<Vec<(String, String)>>;
}

#[async_trait]
pub trait NonceLedger: Send + Sync {
    /// Atomic insert-if-absent; exactly one concurrent caller sees `true`.
    async fn record_if_absent(&self, nonce: &str, at: DateTime<Utc>) -> SyncResult<bool>;
    async fn release(&self, nonce: &str) -> SyncResult<()>;
    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64>;
}

/// Sent notifications per wallet object. Every write returns a
/// reservation id that `release` takes back.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn count_since(&self, object_id: &str, since: DateTime<Utc>) -> SyncResult<u32>;

    /// Counts records newer than `since` and stores `record` only while that
    /// count is below `limit`, as one atomic step. `None` means the budget is
    /// spent and nothing was written.
    async fn try_reserve(
        &self,
        record: &NotificationRecord,
        since: DateTime<Utc>,
        limit: u32,
    ) -> SyncResult<Option<String>>;

    /// Stores `record` regardless of the budget.
    async fn record(&self, record: &NotificationRecord) -> SyncResult<String>;

    /// Drops a reservation whose send never happened.
    async fn release(&self, object_id: &str, reservation: &str) -> SyncResult<()>;

    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64>;
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Empty wake push; the device pulls the fresh pass itself.
    async fn send_wake(&self, push_token: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectWrite {
    Updated,
    Missing,
}

#[async_trait]
pub trait GoogleWalletApi: Send + Sync {
    async fn patch_object(&self, object_id: &str, object: &Value) -> SyncResult<ObjectWrite>;
    /// A conflict (object already exists) counts as success.
    async fn insert_object(&self, object: &Value) -> SyncResult<()>;
    async fn upsert_class(&self, class_id: &str, class: &Value) -> SyncResult<()>;
    /// Signs a save-to-wallet token carrying `payload`
    /// (`{"genericClasses": [...], "genericObjects": [...]}`).
    fn sign_save_token(&self, payload: &Value) -> SyncResult<String>;
}
