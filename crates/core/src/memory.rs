//! In-process implementations of every port, with switches for injecting
//! failures. Test suites across the workspace build on these.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::auth::generate_id;
use crate::clock::Clock;
use crate::config::{SyncPolicy, WalletIdentity};
use crate::error::{SyncError, SyncResult};
use crate::ports::{
    DesignStore, GoogleWalletApi, NonceLedger, NotificationLedger, ObjectStorage, ObjectWrite,
    PushGateway, RegistrationStore, Renderer, StripStore,
};
use crate::service::{Collaborators, WalletSync};
use crate::types::{
    Business, CacheEntry, CacheKey, Customer, Design, DesignStyle, NotificationRecord, Platform,
    Registration, Resolution, StripStatus,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn sample_design(id: &str, business_id: &str, total_stamps: i32) -> Design {
    let now = Utc::now();
    Design {
        id: id.to_string(),
        business_id: business_id.to_string(),
        name: "Loyalty Card".to_string(),
        description: format!("Collect {} stamps for a reward", total_stamps),
        logo_url: None,
        total_stamps,
        style: DesignStyle::default(),
        is_active: false,
        strip_status: StripStatus::Ready,
        strip_generation: 1,
        created_at: now,
        updated_at: now,
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = guard(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *guard(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *guard(&self.now)
    }
}

type StripKey = (String, i32, CacheKey);

#[derive(Default)]
pub struct MemoryStore {
    businesses: Mutex<HashMap<String, Business>>,
    customers: Mutex<HashMap<String, Customer>>,
    designs: Mutex<HashMap<String, Design>>,
    strips: Mutex<BTreeMap<StripKey, CacheEntry>>,
    registrations: Mutex<Vec<Registration>>,
    nonces: Mutex<HashMap<String, DateTime<Utc>>>,
    notifications: Mutex<Vec<(String, NotificationRecord)>>,
    pub fail_registrations: AtomicBool,
    pub fail_notification_ledger: AtomicBool,
    /// Ledger calls never complete while set.
    pub hang_notification_ledger: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_business(&self, id: &str, name: &str) -> Business {
        let business = Business {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        guard(&self.businesses).insert(id.to_string(), business.clone());
        business
    }

    pub fn seed_customer(&self, id: &str, business_id: &str, stamps: i32) -> Customer {
        let customer = Customer {
            id: id.to_string(),
            business_id: business_id.to_string(),
            name: format!("Customer {}", id),
            stamps,
            created_at: Utc::now(),
        };
        guard(&self.customers).insert(id.to_string(), customer.clone());
        customer
    }

    pub fn seed_design(&self, design: Design) -> Design {
        guard(&self.designs).insert(design.id.clone(), design.clone());
        design
    }

    /// Stands in for the design-edit write the API layer performs.
    pub fn put_design(&self, design: &Design) {
        guard(&self.designs).insert(design.id.clone(), design.clone());
    }

    pub fn set_customer_stamps(&self, customer_id: &str, stamps: i32) {
        if let Some(customer) = guard(&self.customers).get_mut(customer_id) {
            customer.stamps = stamps;
        }
    }

    pub fn design(&self, id: &str) -> Option<Design> {
        guard(&self.designs).get(id).cloned()
    }

    pub fn strip_entries(&self, design_id: &str) -> Vec<CacheEntry> {
        guard(&self.strips)
            .values()
            .filter(|entry| entry.design_id == design_id)
            .cloned()
            .collect()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        guard(&self.registrations).clone()
    }

    pub fn nonce_count(&self) -> usize {
        guard(&self.nonces).len()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        guard(&self.notifications)
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn registrations_available(&self) -> SyncResult<()> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("registration store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DesignStore for MemoryStore {
    async fn get_design(&self, id: &str) -> SyncResult<Design> {
        guard(&self.designs)
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("design {}", id)))
    }

    async fn get_active_design(&self, business_id: &str) -> SyncResult<Option<Design>> {
        Ok(guard(&self.designs)
            .values()
            .find(|d| d.business_id == business_id && d.is_active)
            .cloned())
    }

    async fn get_customer(&self, id: &str) -> SyncResult<Customer> {
        guard(&self.customers)
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("customer {}", id)))
    }

    async fn get_business(&self, id: &str) -> SyncResult<Business> {
        guard(&self.businesses)
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("business {}", id)))
    }

    async fn begin_regeneration(&self, design_id: &str) -> SyncResult<bool> {
        let mut designs = guard(&self.designs);
        let design = designs
            .get_mut(design_id)
            .ok_or_else(|| SyncError::NotFound(format!("design {}", design_id)))?;
        if design.strip_status == StripStatus::Regenerating {
            return Ok(false);
        }
        design.strip_status = StripStatus::Regenerating;
        design.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_strip_status(&self, design_id: &str, status: StripStatus) -> SyncResult<()> {
        let mut designs = guard(&self.designs);
        let design = designs
            .get_mut(design_id)
            .ok_or_else(|| SyncError::NotFound(format!("design {}", design_id)))?;
        design.strip_status = status;
        design.updated_at = Utc::now();
        Ok(())
    }

    async fn promote_strip_generation(&self, design_id: &str, generation: i32) -> SyncResult<()> {
        let mut designs = guard(&self.designs);
        let design = designs
            .get_mut(design_id)
            .ok_or_else(|| SyncError::NotFound(format!("design {}", design_id)))?;
        design.strip_generation = generation;
        Ok(())
    }

    async fn activate_design(&self, business_id: &str, design_id: &str) -> SyncResult<Design> {
        let mut designs = guard(&self.designs);
        match designs.get(design_id) {
            Some(design) if design.business_id == business_id => {}
            _ => return Err(SyncError::NotFound(format!("design {}", design_id))),
        }
        let mut activated = None;
        for design in designs.values_mut() {
            if design.business_id != business_id {
                continue;
            }
            design.is_active = design.id == design_id;
            if design.is_active {
                activated = Some(design.clone());
            }
        }
        activated.ok_or_else(|| SyncError::NotFound(format!("design {}", design_id)))
    }

    async fn list_stalled_regenerations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> SyncResult<Vec<Design>> {
        Ok(guard(&self.designs)
            .values()
            .filter(|d| d.strip_status == StripStatus::Regenerating && d.updated_at < updated_before)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StripStore for MemoryStore {
    async fn list_entries(&self, design_id: &str, generation: i32) -> SyncResult<Vec<CacheEntry>> {
        Ok(guard(&self.strips)
            .values()
            .filter(|e| e.design_id == design_id && e.generation == generation)
            .cloned()
            .collect())
    }

    async fn get_entry(
        &self,
        design_id: &str,
        generation: i32,
        key: &CacheKey,
    ) -> SyncResult<Option<CacheEntry>> {
        Ok(guard(&self.strips)
            .get(&(design_id.to_string(), generation, *key))
            .cloned())
    }

    async fn upsert_entry(&self, entry: &CacheEntry) -> SyncResult<()> {
        guard(&self.strips).insert(
            (entry.design_id.clone(), entry.generation, entry.key),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_generation(
        &self,
        design_id: &str,
        generation: i32,
    ) -> SyncResult<Vec<CacheEntry>> {
        let mut strips = guard(&self.strips);
        let keys: Vec<StripKey> = strips
            .keys()
            .filter(|(d, g, _)| d == design_id && *g == generation)
            .cloned()
            .collect();
        Ok(keys.iter().filter_map(|k| strips.remove(k)).collect())
    }

    async fn delete_all(&self, design_id: &str) -> SyncResult<Vec<CacheEntry>> {
        let mut strips = guard(&self.strips);
        let keys: Vec<StripKey> = strips
            .keys()
            .filter(|(d, _, _)| d == design_id)
            .cloned()
            .collect();
        Ok(keys.iter().filter_map(|k| strips.remove(k)).collect())
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn insert_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
        device_library_id: Option<&str>,
    ) -> SyncResult<bool> {
        self.registrations_available()?;
        let mut registrations = guard(&self.registrations);
        if registrations
            .iter()
            .any(|r| r.customer_id == customer_id && r.platform == platform && r.handle == handle)
        {
            return Ok(false);
        }
        if let Some(device) = device_library_id {
            if let Some(existing) = registrations.iter_mut().find(|r| {
                r.customer_id == customer_id
                    && r.platform == platform
                    && r.device_library_id.as_deref() == Some(device)
            }) {
                existing.handle = handle.to_string();
                return Ok(true);
            }
        }
        registrations.push(Registration {
            id: generate_id("reg"),
            customer_id: customer_id.to_string(),
            platform,
            handle: handle.to_string(),
            device_library_id: device_library_id.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn delete_registration(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
    ) -> SyncResult<bool> {
        self.registrations_available()?;
        let mut registrations = guard(&self.registrations);
        let before = registrations.len();
        registrations
            .retain(|r| !(r.customer_id == customer_id && r.platform == platform && r.handle == handle));
        Ok(registrations.len() != before)
    }

    async fn delete_device(&self, customer_id: &str, device_library_id: &str) -> SyncResult<bool> {
        self.registrations_available()?;
        let mut registrations = guard(&self.registrations);
        let before = registrations.len();
        registrations.retain(|r| {
            !(r.customer_id == customer_id
                && r.device_library_id.as_deref() == Some(device_library_id))
        });
        Ok(registrations.len() != before)
    }

    async fn list_handles(&self, customer_id: &str, platform: Platform) -> SyncResult<Vec<String>> {
        self.registrations_available()?;
        Ok(guard(&self.registrations)
            .iter()
            .filter(|r| r.customer_id == customer_id && r.platform == platform)
            .map(|r| r.handle.clone())
            .collect())
    }

    async fn list_for_business(
        &self,
        business_id: &str,
        platform: Platform,
    ) -> SyncResult<Vec<(String, String)>> {
        self.registrations_available()?;
        let customers = guard(&self.customers);
        let mut pairs: Vec<(String, String)> = guard(&self.registrations)
            .iter()
            .filter(|r| r.platform == platform)
            .filter(|r| {
                customers
                    .get(&r.customer_id)
                    .is_some_and(|c| c.business_id == business_id)
            })
            .map(|r| (r.customer_id.clone(), r.handle.clone()))
            .collect();
        pairs.sort();
        Ok(pairs)
    }
}

#[async_trait]
impl NonceLedger for MemoryStore {
    async fn record_if_absent(&self, nonce: &str, at: DateTime<Utc>) -> SyncResult<bool> {
        let mut nonces = guard(&self.nonces);
        if nonces.contains_key(nonce) {
            return Ok(false);
        }
        nonces.insert(nonce.to_string(), at);
        Ok(true)
    }

    async fn release(&self, nonce: &str) -> SyncResult<()> {
        guard(&self.nonces).remove(nonce);
        Ok(())
    }

    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        let mut nonces = guard(&self.nonces);
        let before = nonces.len();
        nonces.retain(|_, at| *at >= older_than);
        Ok((before - nonces.len()) as u64)
    }
}

impl MemoryStore {
    async fn notification_ledger_available(&self) -> SyncResult<()> {
        if self.hang_notification_ledger.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_notification_ledger.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("notification ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationLedger for MemoryStore {
    async fn count_since(&self, object_id: &str, since: DateTime<Utc>) -> SyncResult<u32> {
        self.notification_ledger_available().await?;
        Ok(guard(&self.notifications)
            .iter()
            .filter(|(_, n)| n.object_id == object_id && n.sent_at > since)
            .count() as u32)
    }

    async fn try_reserve(
        &self,
        record: &NotificationRecord,
        since: DateTime<Utc>,
        limit: u32,
    ) -> SyncResult<Option<String>> {
        self.notification_ledger_available().await?;
        let mut notifications = guard(&self.notifications);
        let sent = notifications
            .iter()
            .filter(|(_, n)| n.object_id == record.object_id && n.sent_at > since)
            .count() as u32;
        if sent >= limit {
            return Ok(None);
        }
        let id = generate_id("ntf");
        notifications.push((id.clone(), record.clone()));
        Ok(Some(id))
    }

    async fn record(&self, record: &NotificationRecord) -> SyncResult<String> {
        self.notification_ledger_available().await?;
        let id = generate_id("ntf");
        guard(&self.notifications).push((id.clone(), record.clone()));
        Ok(id)
    }

    async fn release(&self, object_id: &str, reservation: &str) -> SyncResult<()> {
        guard(&self.notifications).retain(|(id, n)| !(id == reservation && n.object_id == object_id));
        Ok(())
    }

    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        let mut notifications = guard(&self.notifications);
        let before = notifications.len();
        notifications.retain(|(_, n)| n.sent_at >= older_than);
        Ok((before - notifications.len()) as u64)
    }
}

/// Deterministic renderer: the bytes name the design, its style digest
/// and the key.
#[derive(Default)]
pub struct MemoryRenderer {
    calls: AtomicUsize,
    failing: Mutex<HashSet<CacheKey>>,
    fail_all: AtomicBool,
}

impl MemoryRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_key(&self, key: CacheKey) {
        guard(&self.failing).insert(key);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        guard(&self.failing).clear();
        self.fail_all.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Renderer for MemoryRenderer {
    async fn render(
        &self,
        design: &Design,
        stamp_count: i32,
        platform: Platform,
        resolution: Resolution,
    ) -> SyncResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = CacheKey {
            stamp_count,
            platform,
            resolution,
        };
        if self.fail_all.load(Ordering::SeqCst) || guard(&self.failing).contains(&key) {
            return Err(SyncError::TransientRemote(format!("render {} failed", key)));
        }
        Ok(format!("{}:{}:{}", design.id, design.render_fingerprint(), key).into_bytes())
    }
}

#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    pub fail_uploads: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn contains(&self, path: &str) -> bool {
        guard(&self.objects).contains_key(path)
    }

    pub fn len(&self) -> usize {
        guard(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> SyncResult<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(SyncError::TransientRemote("upload failed".to_string()));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        guard(&self.objects).insert(path.to_string(), bytes);
        Ok(format!("memory://{}", path))
    }

    async fn delete(&self, paths: &[String]) -> SyncResult<()> {
        let mut objects = guard(&self.objects);
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPushGateway {
    sent: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    pub fail_all: AtomicBool,
}

impl MemoryPushGateway {
    pub fn sent(&self) -> Vec<String> {
        guard(&self.sent).clone()
    }

    pub fn fail_token(&self, token: &str) {
        guard(&self.failing).insert(token.to_string());
    }

    /// Every wake takes this long before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        *guard(&self.latency) = latency;
    }

    /// Most wakes ever outstanding at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushGateway for MemoryPushGateway {
    async fn send_wake(&self, push_token: &str) -> SyncResult<()> {
        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(outstanding, Ordering::SeqCst);
        let latency = *guard(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all.load(Ordering::SeqCst) || guard(&self.failing).contains(push_token) {
            return Err(SyncError::TransientRemote(format!(
                "push to {} failed",
                push_token
            )));
        }
        guard(&self.sent).push(push_token.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGoogleWallet {
    objects: Mutex<HashMap<String, Value>>,
    classes: Mutex<HashMap<String, Value>>,
    patches: AtomicUsize,
    inserts: AtomicUsize,
    latency: Mutex<Duration>,
    pub fail_all: AtomicBool,
}

impl MemoryGoogleWallet {
    pub fn object(&self, id: &str) -> Option<Value> {
        guard(&self.objects).get(id).cloned()
    }

    pub fn class(&self, id: &str) -> Option<Value> {
        guard(&self.classes).get(id).cloned()
    }

    pub fn class_writes(&self) -> usize {
        guard(&self.classes).len()
    }

    /// Every remote object write attempted, patch or insert.
    pub fn writes(&self) -> usize {
        self.patches.load(Ordering::SeqCst) + self.inserts.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Every object patch takes this long before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        *guard(&self.latency) = latency;
    }

    fn available(&self) -> SyncResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(SyncError::TransientRemote("wallet api returned 503".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GoogleWalletApi for MemoryGoogleWallet {
    async fn patch_object(&self, object_id: &str, object: &Value) -> SyncResult<ObjectWrite> {
        let latency = *guard(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.available()?;
        self.patches.fetch_add(1, Ordering::SeqCst);
        let mut objects = guard(&self.objects);
        match objects.get_mut(object_id) {
            Some(existing) => {
                *existing = object.clone();
                Ok(ObjectWrite::Updated)
            }
            None => Ok(ObjectWrite::Missing),
        }
    }

    async fn insert_object(&self, object: &Value) -> SyncResult<()> {
        self.available()?;
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let id = object["id"].as_str().unwrap_or_default().to_string();
        guard(&self.objects).entry(id).or_insert_with(|| object.clone());
        Ok(())
    }

    async fn upsert_class(&self, class_id: &str, class: &Value) -> SyncResult<()> {
        self.available()?;
        guard(&self.classes).insert(class_id.to_string(), class.clone());
        Ok(())
    }

    fn sign_save_token(&self, payload: &Value) -> SyncResult<String> {
        let objects = payload["genericObjects"]
            .as_array()
            .map(|objects| objects.len())
            .unwrap_or(0);
        Ok(format!("memory-jwt.{}", objects))
    }
}

/// A fully wired service over in-memory ports.
pub struct MemoryHarness {
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<MemoryRenderer>,
    pub storage: Arc<MemoryObjectStorage>,
    pub push: Arc<MemoryPushGateway>,
    pub google: Arc<MemoryGoogleWallet>,
    pub clock: Arc<ManualClock>,
    pub sync: WalletSync,
}

pub const TEST_ISSUER: &str = "3388000000000001";

impl MemoryHarness {
    pub fn new() -> Self {
        Self::with_policy(SyncPolicy::default())
    }

    pub fn with_policy(policy: SyncPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let renderer = Arc::new(MemoryRenderer::default());
        let storage = Arc::new(MemoryObjectStorage::default());
        let push = Arc::new(MemoryPushGateway::default());
        let google = Arc::new(MemoryGoogleWallet::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let collaborators = Collaborators {
            designs: store.clone(),
            strips: store.clone(),
            registrations: store.clone(),
            nonces: store.clone(),
            notifications: store.clone(),
            renderer: renderer.clone(),
            storage: storage.clone(),
            push: push.clone(),
            google: google.clone(),
            clock: clock.clone(),
        };
        let identity = WalletIdentity {
            google_issuer_id: TEST_ISSUER.to_string(),
            public_base_url: "https://cards.example.test".to_string(),
        };
        let sync = WalletSync::assemble(collaborators, policy, identity);

        Self {
            store,
            renderer,
            storage,
            push,
            google,
            clock,
            sync,
        }
    }
}

impl Default for MemoryHarness {
    fn default() -> Self {
        Self::new()
    }
}
