use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{within, SyncResult};
use crate::ports::PushGateway;
use crate::registry::DeviceRegistry;
use crate::strips::StripImageCache;
use crate::types::{Business, Customer, Design, Outcome, Platform, Resolution};

/// Push platform: a wake per registered device, the device then fetches
/// the updated pass from the pass web service.
#[derive(Clone)]
pub struct AppleAdapter {
    registry: DeviceRegistry,
    cache: Arc<StripImageCache>,
    gateway: Arc<dyn PushGateway>,
    public_base_url: String,
    remote_timeout: Duration,
}

impl AppleAdapter {
    pub fn new(
        registry: DeviceRegistry,
        cache: Arc<StripImageCache>,
        gateway: Arc<dyn PushGateway>,
        public_base_url: &str,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            gateway,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            remote_timeout,
        }
    }

    pub async fn sync_state(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
    ) -> Outcome {
        let tokens = match within(
            self.remote_timeout,
            self.registry.list_handles(&customer.id, Platform::Apple),
        )
        .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(
                    customer_id = %customer.id,
                    business_id = %business.id,
                    design_id = %design.id,
                    error = %err,
                    "failed to load apple registrations"
                );
                return Outcome::failed(1);
            }
        };
        if tokens.is_empty() {
            debug!(customer_id = %customer.id, "no apple devices registered");
            return Outcome::skipped();
        }

        // The device pulls a pass that embeds this strip; a gap here means it
        // renders the previous one until the cache catches up.
        match self
            .cache
            .lookup(&design.id, stamp_count, Platform::Apple, Resolution::X3)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                customer_id = %customer.id,
                design_id = %design.id,
                stamp_count,
                "apple strip missing from cache"
            ),
            Err(err) => warn!(design_id = %design.id, error = %err, "apple strip lookup failed"),
        }

        let results = join_all(tokens.iter().map(|token| async move {
            (
                token,
                within(self.remote_timeout, self.gateway.send_wake(token)).await,
            )
        }))
        .await;

        let mut outcome = Outcome::default();
        for (token, result) in results {
            match result {
                Ok(()) => outcome.updated += 1,
                Err(err) => {
                    warn!(
                        customer_id = %customer.id,
                        business_id = %business.id,
                        design_id = %design.id,
                        token_suffix = %token_suffix(token),
                        error = %err,
                        "apple wake failed"
                    );
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    pub fn build_save_reference(&self, customer: &Customer) -> String {
        format!("{}/passes/{}", self.public_base_url, customer.id)
    }
}

fn token_suffix(token: &str) -> &str {
    let start = token.len().saturating_sub(8);
    token.get(start..).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_suffix() {
        assert_eq!(token_suffix("abcdef0123456789"), "23456789");
        assert_eq!(token_suffix("short"), "short");
    }
}
