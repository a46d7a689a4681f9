use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{within, SyncResult};
use crate::ports::{GoogleWalletApi, NotificationLedger, ObjectWrite};
use crate::registry::DeviceRegistry;
use crate::strips::StripImageCache;
use crate::types::{
    google_class_id, google_object_id, Business, Customer, Design, NotificationKind,
    NotificationRecord, Outcome, Platform, Resolution,
};

pub const SAVE_URL_BASE: &str = "https://pay.google.com/gp/v/save";
pub const DEFAULT_BACKGROUND: &str = "#8B5A2B";

/// Normalises `#RGB`, `#RRGGBB` and `rgb(r, g, b)` to `#rrggbb`.
pub fn hex_color(input: &str) -> String {
    let value = input.trim();
    if let Some(hex) = value.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return DEFAULT_BACKGROUND.to_string();
        }
        return match hex.len() {
            6 => format!("#{}", hex.to_ascii_lowercase()),
            3 => {
                let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
                format!("#{}", expanded.to_ascii_lowercase())
            }
            _ => DEFAULT_BACKGROUND.to_string(),
        };
    }

    let channels = value
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(|inner| {
            inner
                .split(',')
                .map(|part| part.trim().parse::<u8>())
                .collect::<Result<Vec<u8>, _>>()
        });
    match channels {
        Some(Ok(rgb)) if rgb.len() == 3 => format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]),
        _ => DEFAULT_BACKGROUND.to_string(),
    }
}

fn localized(value: &str) -> Value {
    json!({ "defaultValue": { "language": "en", "value": value } })
}

enum Slot {
    Reserved(String),
    /// Sent anyway, but the ledger write failed.
    Unrecorded,
    Spent,
}

/// REST platform: the issuer writes object state directly, subject to the
/// provider's per-object notification budget.
#[derive(Clone)]
pub struct GoogleAdapter {
    registry: DeviceRegistry,
    cache: Arc<StripImageCache>,
    api: Arc<dyn GoogleWalletApi>,
    ledger: Arc<dyn NotificationLedger>,
    clock: Arc<dyn Clock>,
    issuer_id: String,
    public_base_url: String,
    notify_limit: u32,
    notify_window: chrono::Duration,
    remote_timeout: Duration,
}

#[allow(clippy::too_many_arguments)]
impl GoogleAdapter {
    pub fn new(
        registry: DeviceRegistry,
        cache: Arc<StripImageCache>,
        api: Arc<dyn GoogleWalletApi>,
        ledger: Arc<dyn NotificationLedger>,
        clock: Arc<dyn Clock>,
        issuer_id: &str,
        public_base_url: &str,
        notify_limit: u32,
        notify_window: chrono::Duration,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            api,
            ledger,
            clock,
            issuer_id: issuer_id.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            notify_limit,
            notify_window,
            remote_timeout,
        }
    }

    pub fn object_id(&self, customer_id: &str) -> String {
        google_object_id(&self.issuer_id, customer_id)
    }

    pub fn class_id(&self, business_id: &str) -> String {
        google_class_id(&self.issuer_id, business_id)
    }

    /// Whether another notification fits in the trailing window. A ledger
    /// outage counts as "no": skipping is recoverable, exceeding the
    /// provider budget is not.
    pub async fn rate_limit_allows(&self, customer_id: &str) -> bool {
        let object_id = self.object_id(customer_id);
        let since = self.clock.now() - self.notify_window;
        match within(self.remote_timeout, self.ledger.count_since(&object_id, since)).await {
            Ok(sent) => sent < self.notify_limit,
            Err(err) => {
                warn!(customer_id, object_id = %object_id, error = %err, "notification ledger unavailable");
                false
            }
        }
    }

    /// Takes a slot in the notification budget for this update. Rewards
    /// are recorded without checking the budget.
    async fn reserve(&self, record: &NotificationRecord) -> Slot {
        if record.kind == NotificationKind::Reward {
            return match within(self.remote_timeout, self.ledger.record(record)).await {
                Ok(reservation) => Slot::Reserved(reservation),
                Err(err) => {
                    warn!(object_id = %record.object_id, error = %err, "failed to record google notification");
                    Slot::Unrecorded
                }
            };
        }

        let since = record.sent_at - self.notify_window;
        match within(
            self.remote_timeout,
            self.ledger.try_reserve(record, since, self.notify_limit),
        )
        .await
        {
            Ok(Some(reservation)) => Slot::Reserved(reservation),
            Ok(None) => Slot::Spent,
            Err(err) => {
                warn!(object_id = %record.object_id, error = %err, "notification ledger unavailable");
                Slot::Spent
            }
        }
    }

    async fn release(&self, object_id: &str, reservation: &str) {
        if let Err(err) =
            within(self.remote_timeout, self.ledger.release(object_id, reservation)).await
        {
            warn!(object_id, error = %err, "failed to release google notification slot");
        }
    }

    /// Stamp and reward updates notify the holder and spend budget.
    /// `Design` refreshes are written silently and never touch the ledger,
    /// so every object moves to the newest strips.
    pub async fn sync_state(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
        kind: NotificationKind,
    ) -> Outcome {
        let object_id = self.object_id(&customer.id);
        match within(
            self.remote_timeout,
            self.registry.list_handles(&customer.id, Platform::Google),
        )
        .await
        {
            Ok(handles) if handles.is_empty() => {
                debug!(customer_id = %customer.id, "no google object saved");
                return Outcome::skipped();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    customer_id = %customer.id,
                    business_id = %business.id,
                    design_id = %design.id,
                    error = %err,
                    "failed to load google registrations"
                );
                return Outcome::failed(1);
            }
        }

        let sent_at = self.clock.now();
        let reservation = if kind == NotificationKind::Design {
            None
        } else {
            let record = NotificationRecord {
                customer_id: customer.id.clone(),
                object_id: object_id.clone(),
                kind,
                sent_at,
            };
            match self.reserve(&record).await {
                Slot::Reserved(reservation) => Some(reservation),
                Slot::Unrecorded => None,
                Slot::Spent => {
                    info!(
                        customer_id = %customer.id,
                        object_id = %object_id,
                        stamp_count,
                        "google update skipped, notification budget spent"
                    );
                    return Outcome::skipped();
                }
            }
        };

        let mut object = self
            .object_payload(customer, business, design, stamp_count)
            .await;
        if kind != NotificationKind::Design {
            push_message(&mut object, notification_message(design, stamp_count, sent_at));
        }

        if let Err(err) = within(self.remote_timeout, self.upsert_object(&object_id, &object)).await
        {
            warn!(
                customer_id = %customer.id,
                business_id = %business.id,
                design_id = %design.id,
                object_id = %object_id,
                error = %err,
                "google object update failed"
            );
            if let Some(reservation) = reservation {
                self.release(&object_id, &reservation).await;
            }
            return Outcome::failed(1);
        }
        Outcome::updated(1)
    }

    /// Writes the per-business class once. Failures are reported, never raised.
    pub async fn sync_class(&self, business: &Business, design: &Design) -> Outcome {
        let class_id = self.class_id(&business.id);
        let class = self.class_payload(business, design);
        match within(self.remote_timeout, self.api.upsert_class(&class_id, &class)).await {
            Ok(()) => {
                info!(business_id = %business.id, class_id = %class_id, "google class updated");
                Outcome::updated(1)
            }
            Err(err) => {
                warn!(
                    business_id = %business.id,
                    design_id = %design.id,
                    class_id = %class_id,
                    error = %err,
                    "google class update failed"
                );
                Outcome::failed(1)
            }
        }
    }

    pub async fn build_save_reference(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
    ) -> SyncResult<String> {
        let payload = json!({
            "genericClasses": [self.class_payload(business, design)],
            "genericObjects": [self.object_payload(customer, business, design, stamp_count).await],
        });
        let token = self.api.sign_save_token(&payload)?;
        Ok(format!("{}/{}", SAVE_URL_BASE, token))
    }

    async fn upsert_object(&self, object_id: &str, object: &Value) -> SyncResult<()> {
        match self.api.patch_object(object_id, object).await? {
            ObjectWrite::Updated => Ok(()),
            ObjectWrite::Missing => {
                debug!(object_id, "google object missing, creating");
                self.api.insert_object(object).await
            }
        }
    }

    pub fn class_payload(&self, business: &Business, design: &Design) -> Value {
        json!({
            "id": self.class_id(&business.id),
            "reviewStatus": "UNDER_REVIEW",
            "hexBackgroundColor": hex_color(&design.style.background_color),
            "callbackOptions": {
                "url": format!("{}/v1/google/callback", self.public_base_url),
            },
        })
    }

    pub async fn object_payload(
        &self,
        customer: &Customer,
        business: &Business,
        design: &Design,
        stamp_count: i32,
    ) -> Value {
        let progress = format!("{} / {}", stamp_count, design.total_stamps);
        let mut object = json!({
            "id": self.object_id(&customer.id),
            "classId": self.class_id(&business.id),
            "state": "ACTIVE",
            "cardTitle": localized(&business.name),
            "header": localized(&design.name),
            "subheader": localized(&design.description),
            "hexBackgroundColor": hex_color(&design.style.background_color),
            "barcode": {
                "type": "QR_CODE",
                "value": customer.id,
            },
            "textModulesData": [
                { "id": "stamps", "header": "Stamps", "body": progress },
            ],
        });

        if let Some(logo) = design.logo_url.as_deref() {
            object["logo"] = json!({ "sourceUri": { "uri": logo } });
        }

        match self
            .cache
            .lookup(&design.id, stamp_count, Platform::Google, Resolution::Hero)
            .await
        {
            Ok(Some(url)) => {
                object["heroImage"] = json!({
                    "sourceUri": { "uri": url },
                    "contentDescription": localized(&format!(
                        "{} of {} stamps collected",
                        stamp_count, design.total_stamps
                    )),
                });
            }
            Ok(None) => warn!(design_id = %design.id, stamp_count, "google hero image missing"),
            Err(err) => warn!(design_id = %design.id, error = %err, "google hero lookup failed"),
        }

        if stamp_count >= design.total_stamps {
            push_message(
                &mut object,
                json!({
                    "id": "reward_ready",
                    "header": "Reward earned",
                    "body": "Show this card to redeem your reward.",
                }),
            );
        }
        object
    }
}

fn push_message(object: &mut Value, message: Value) {
    if let Some(messages) = object["messages"].as_array_mut() {
        messages.push(message);
        return;
    }
    object["messages"] = json!([message]);
}

/// The only part of an object write that makes the holder's phone buzz.
fn notification_message(design: &Design, stamp_count: i32, sent_at: DateTime<Utc>) -> Value {
    let body = if stamp_count >= design.total_stamps {
        "Your card is full. Your reward is ready!".to_string()
    } else {
        format!("{} of {} stamps collected", stamp_count, design.total_stamps)
    };
    json!({
        "id": format!("notify_{}", sent_at.timestamp_millis()),
        "header": "Update",
        "body": body,
        "messageType": "TEXT_AND_NOTIFY",
    })
}
