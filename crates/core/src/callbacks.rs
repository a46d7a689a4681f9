use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::metrics::METRICS;
use crate::ports::NonceLedger;
use crate::registry::DeviceRegistry;
use crate::types::{customer_id_from_object, CallbackAction, CallbackResult, Platform};

/// Applies provider save/delete callbacks exactly once per nonce.
pub struct CallbackDeduplicator {
    ledger: Arc<dyn NonceLedger>,
    registry: DeviceRegistry,
    clock: Arc<dyn Clock>,
}

impl CallbackDeduplicator {
    pub fn new(ledger: Arc<dyn NonceLedger>, registry: DeviceRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            registry,
            clock,
        }
    }

    /// The nonce is claimed before the action runs. A failed action gives
    /// the nonce back so the provider's retry gets processed.
    pub async fn process(
        &self,
        nonce: &str,
        event_type: &str,
        object_reference: &str,
    ) -> SyncResult<CallbackResult> {
        if !self.ledger.record_if_absent(nonce, self.clock.now()).await? {
            debug!(nonce, event_type, "duplicate callback");
            METRICS.record_callback(true);
            return Ok(CallbackResult {
                already_processed: true,
                action: CallbackAction::None,
            });
        }

        let mut action = CallbackAction::from_event_type(event_type);
        if let Err(err) = self.apply(action, object_reference).await {
            error!(nonce, event_type, object_id = object_reference, error = %err, "callback action failed");
            if let Err(release_err) = self.ledger.release(nonce).await {
                error!(nonce, error = %release_err, "failed to release callback nonce");
            }
            return Err(err);
        }

        if action != CallbackAction::None && customer_id_from_object(object_reference).is_none() {
            warn!(nonce, object_id = object_reference, "callback object id has no customer part");
            action = CallbackAction::None;
        }

        METRICS.record_callback(false);
        info!(nonce, event_type, object_id = object_reference, action = ?action, "callback processed");
        Ok(CallbackResult {
            already_processed: false,
            action,
        })
    }

    async fn apply(&self, action: CallbackAction, object_reference: &str) -> SyncResult<()> {
        let Some(customer_id) = customer_id_from_object(object_reference) else {
            return Ok(());
        };
        match action {
            CallbackAction::Register => {
                self.registry
                    .register(customer_id, Platform::Google, object_reference)
                    .await?;
            }
            CallbackAction::Unregister => {
                self.registry
                    .unregister(customer_id, Platform::Google, object_reference)
                    .await?;
            }
            CallbackAction::None => {}
        }
        Ok(())
    }
}
