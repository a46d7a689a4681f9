use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::ports::RegistrationStore;
use crate::types::Platform;

/// Which device tokens / wallet objects reach each customer's pass.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn RegistrationStore>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    /// Adds `handle` for the customer. Registering the same handle twice is
    /// a no-op that returns `false`.
    pub async fn register(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
    ) -> SyncResult<bool> {
        self.register_device(customer_id, platform, handle, None)
            .await
    }

    /// Like `register`, also remembering which physical device holds the
    /// handle so the device can later unregister without knowing it.
    pub async fn register_device(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
        device_library_id: Option<&str>,
    ) -> SyncResult<bool> {
        if handle.trim().is_empty() {
            return Err(SyncError::InvariantViolation(format!(
                "empty {} handle for customer {}",
                platform, customer_id
            )));
        }
        let created = self
            .store
            .insert_registration(customer_id, platform, handle, device_library_id)
            .await?;
        if created {
            info!(customer_id, platform = %platform, "registration added");
        } else {
            debug!(customer_id, platform = %platform, "registration already present");
        }
        Ok(created)
    }

    /// Removes exactly the named handle. Returns whether it existed.
    pub async fn unregister(
        &self,
        customer_id: &str,
        platform: Platform,
        handle: &str,
    ) -> SyncResult<bool> {
        let removed = self
            .store
            .delete_registration(customer_id, platform, handle)
            .await?;
        if removed {
            info!(customer_id, platform = %platform, "registration removed");
        }
        Ok(removed)
    }

    pub async fn unregister_device(
        &self,
        customer_id: &str,
        device_library_id: &str,
    ) -> SyncResult<bool> {
        let removed = self
            .store
            .delete_device(customer_id, device_library_id)
            .await?;
        if removed {
            info!(customer_id, device_library_id, "device unregistered");
        }
        Ok(removed)
    }

    pub async fn list_handles(
        &self,
        customer_id: &str,
        platform: Platform,
    ) -> SyncResult<BTreeSet<String>> {
        Ok(self
            .store
            .list_handles(customer_id, platform)
            .await?
            .into_iter()
            .collect())
    }

    /// `(customer_id, handle)` pairs for every registered pass of a business.
    pub async fn list_all_for_business(
        &self,
        business_id: &str,
        platform: Platform,
    ) -> SyncResult<impl Iterator<Item = (String, String)>> {
        Ok(self
            .store
            .list_for_business(business_id, platform)
            .await?
            .into_iter())
    }

    /// Distinct customers reachable on either platform.
    pub async fn customers_for_business(&self, business_id: &str) -> SyncResult<BTreeSet<String>> {
        let mut customers = BTreeSet::new();
        for platform in Platform::ALL {
            customers.extend(
                self.list_all_for_business(business_id, platform)
                    .await?
                    .map(|(customer_id, _)| customer_id),
            );
        }
        Ok(customers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, DeviceRegistry) {
        let store = Arc::new(MemoryStore::new());
        store.seed_business("biz_1", "Bean There");
        store.seed_customer("cus_1", "biz_1", 0);
        store.seed_customer("cus_2", "biz_1", 0);
        store.seed_customer("cus_3", "biz_other", 0);
        let registry = DeviceRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn test_register_is_append_only_per_handle() {
        let (_, registry) = registry();

        assert!(registry.register("cus_1", Platform::Apple, "tok_a").await.unwrap());
        assert!(registry.register("cus_1", Platform::Apple, "tok_b").await.unwrap());
        assert!(
            !registry.register("cus_1", Platform::Apple, "tok_a").await.unwrap(),
            "duplicate handle should not be added twice"
        );

        let handles = registry.list_handles("cus_1", Platform::Apple).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert!(handles.contains("tok_a") && handles.contains("tok_b"));
    }

    #[tokio::test]
    async fn test_unregister_removes_only_named_handle() {
        let (_, registry) = registry();
        registry.register("cus_1", Platform::Apple, "tok_a").await.unwrap();
        registry.register("cus_1", Platform::Apple, "tok_b").await.unwrap();

        assert!(registry.unregister("cus_1", Platform::Apple, "tok_a").await.unwrap());
        assert!(!registry.unregister("cus_1", Platform::Apple, "tok_a").await.unwrap());

        let handles = registry.list_handles("cus_1", Platform::Apple).await.unwrap();
        assert_eq!(handles.into_iter().collect::<Vec<_>>(), vec!["tok_b".to_string()]);
    }

    #[tokio::test]
    async fn test_unregistered_customer_has_empty_set() {
        let (_, registry) = registry();
        let handles = registry.list_handles("cus_2", Platform::Google).await.unwrap();
        assert!(handles.is_empty(), "no registration means empty, not an error");
    }

    #[tokio::test]
    async fn test_platforms_are_independent() {
        let (_, registry) = registry();
        registry.register("cus_1", Platform::Google, "issuer.cus_1").await.unwrap();

        assert!(registry.list_handles("cus_1", Platform::Apple).await.unwrap().is_empty());
        assert_eq!(registry.list_handles("cus_1", Platform::Google).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_handle_rejected() {
        let (_, registry) = registry();
        let err = registry.register("cus_1", Platform::Apple, " ").await.unwrap_err();
        assert!(matches!(err, SyncError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_unregister_device_by_library_id() {
        let (_, registry) = registry();
        registry
            .register_device("cus_1", Platform::Apple, "tok_a", Some("dev_1"))
            .await
            .unwrap();
        registry
            .register_device("cus_1", Platform::Apple, "tok_b", Some("dev_2"))
            .await
            .unwrap();

        assert!(registry.unregister_device("cus_1", "dev_1").await.unwrap());
        let handles = registry.list_handles("cus_1", Platform::Apple).await.unwrap();
        assert_eq!(handles.len(), 1);
        assert!(handles.contains("tok_b"));
    }

    #[tokio::test]
    async fn test_list_all_for_business_scopes_by_business() {
        let (_, registry) = registry();
        registry.register("cus_1", Platform::Apple, "tok_a").await.unwrap();
        registry.register("cus_2", Platform::Google, "issuer.cus_2").await.unwrap();
        registry.register("cus_3", Platform::Apple, "tok_c").await.unwrap();

        let apple: Vec<_> = registry
            .list_all_for_business("biz_1", Platform::Apple)
            .await
            .unwrap()
            .collect();
        assert_eq!(apple, vec![("cus_1".to_string(), "tok_a".to_string())]);

        let customers = registry.customers_for_business("biz_1").await.unwrap();
        assert_eq!(customers.len(), 2, "cus_3 belongs to another business");
    }
}
