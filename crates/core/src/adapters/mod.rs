pub mod apple;
pub mod google;

pub use apple::AppleAdapter;
pub use google::GoogleAdapter;

use crate::error::SyncResult;
use crate::metrics::METRICS;
use crate::types::{Business, Customer, Design, NotificationKind, Outcome, Platform};

/// The two wallet platforms behind one contract. Neither variant ever
/// returns an error from `sync_state`; failures come back as counts.
#[derive(Clone)]
pub enum PlatformAdapter {
    Apple(AppleAdapter),
    Google(GoogleAdapter),
}

impl PlatformAdapter {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformAdapter::Apple(_) => Platform::Apple,
            PlatformAdapter::Google(_) => Platform::Google,
        }
    }

    pub async fn sync_state(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
    ) -> Outcome {
        let kind = NotificationKind::for_stamps(stamp_count, design.total_stamps);
        self.sync_as(customer, business, design, stamp_count, kind)
            .await
    }

    /// Re-sends the customer's current state after a design change.
    pub async fn notify(&self, customer: &Customer, business: &Business, design: &Design) -> Outcome {
        let stamps = customer.stamps.clamp(0, design.total_stamps);
        let kind = match NotificationKind::for_stamps(stamps, design.total_stamps) {
            NotificationKind::Reward => NotificationKind::Reward,
            _ => NotificationKind::Design,
        };
        self.sync_as(customer, business, design, stamps, kind).await
    }

    async fn sync_as(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
        kind: NotificationKind,
    ) -> Outcome {
        let outcome = match self {
            PlatformAdapter::Apple(apple) => {
                apple
                    .sync_state(customer, business, design, stamp_count)
                    .await
            }
            PlatformAdapter::Google(google) => {
                google
                    .sync_state(customer, business, design, stamp_count, kind)
                    .await
            }
        };
        METRICS.record_sync(self.platform(), &outcome);
        outcome
    }

    pub async fn build_save_reference(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
    ) -> SyncResult<String> {
        match self {
            PlatformAdapter::Apple(apple) => Ok(apple.build_save_reference(customer)),
            PlatformAdapter::Google(google) => {
                google
                    .build_save_reference(customer, business, design, stamp_count)
                    .await
            }
        }
    }

    /// Writes the platform's shared per-business record, if it has one.
    pub async fn sync_template(&self, business: &Business, design: &Design) -> Option<Outcome> {
        match self {
            PlatformAdapter::Apple(_) => None,
            PlatformAdapter::Google(google) => Some(google.sync_class(business, design).await),
        }
    }

    /// The push platform has no budget of its own.
    pub async fn rate_limit_allows(&self, customer: &Customer) -> bool {
        match self {
            PlatformAdapter::Apple(_) => true,
            PlatformAdapter::Google(google) => google.rate_limit_allows(&customer.id).await,
        }
    }
}
