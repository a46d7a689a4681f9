use std::sync::Arc;

use crate::adapters::{AppleAdapter, GoogleAdapter, PlatformAdapter};
use crate::callbacks::CallbackDeduplicator;
use crate::clock::Clock;
use crate::config::{SyncPolicy, WalletIdentity};
use crate::coordinator::PassCoordinator;
use crate::ports::{
    DesignStore, GoogleWalletApi, NonceLedger, NotificationLedger, ObjectStorage, PushGateway,
    RegistrationStore, Renderer, StripStore,
};
use crate::registry::DeviceRegistry;
use crate::strips::StripImageCache;

/// Concrete implementations of every port, supplied by the binaries.
#[derive(Clone)]
pub struct Collaborators {
    pub designs: Arc<dyn DesignStore>,
    pub strips: Arc<dyn StripStore>,
    pub registrations: Arc<dyn RegistrationStore>,
    pub nonces: Arc<dyn NonceLedger>,
    pub notifications: Arc<dyn NotificationLedger>,
    pub renderer: Arc<dyn Renderer>,
    pub storage: Arc<dyn ObjectStorage>,
    pub push: Arc<dyn PushGateway>,
    pub google: Arc<dyn GoogleWalletApi>,
    pub clock: Arc<dyn Clock>,
}

/// The wired subsystem. Cheap to clone.
#[derive(Clone)]
pub struct WalletSync {
    pub coordinator: PassCoordinator,
    pub callbacks: Arc<CallbackDeduplicator>,
    pub registry: DeviceRegistry,
    pub cache: Arc<StripImageCache>,
    pub designs: Arc<dyn DesignStore>,
    pub nonces: Arc<dyn NonceLedger>,
    pub notifications: Arc<dyn NotificationLedger>,
    pub clock: Arc<dyn Clock>,
    pub policy: SyncPolicy,
}

impl WalletSync {
    pub fn assemble(parts: Collaborators, policy: SyncPolicy, identity: WalletIdentity) -> Self {
        let registry = DeviceRegistry::new(parts.registrations.clone());
        let cache = Arc::new(StripImageCache::new(
            parts.strips.clone(),
            parts.designs.clone(),
            parts.renderer.clone(),
            parts.storage.clone(),
            parts.clock.clone(),
            policy.remote_timeout,
            policy.render_concurrency,
        ));

        let apple = PlatformAdapter::Apple(AppleAdapter::new(
            registry.clone(),
            cache.clone(),
            parts.push.clone(),
            &identity.public_base_url,
            policy.remote_timeout,
        ));
        let google = PlatformAdapter::Google(GoogleAdapter::new(
            registry.clone(),
            cache.clone(),
            parts.google.clone(),
            parts.notifications.clone(),
            parts.clock.clone(),
            &identity.google_issuer_id,
            &identity.public_base_url,
            policy.google_notify_limit,
            policy.google_notify_window,
            policy.remote_timeout,
        ));

        let coordinator = PassCoordinator::new(
            parts.designs.clone(),
            cache.clone(),
            registry.clone(),
            apple,
            google,
            policy.regeneration_workers,
            policy.fanout_concurrency,
            policy.remote_timeout,
        );
        let callbacks = Arc::new(CallbackDeduplicator::new(
            parts.nonces.clone(),
            registry.clone(),
            parts.clock.clone(),
        ));

        Self {
            coordinator,
            callbacks,
            registry,
            cache,
            designs: parts.designs,
            nonces: parts.nonces,
            notifications: parts.notifications,
            clock: parts.clock,
            policy,
        }
    }
}
