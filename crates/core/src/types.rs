use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{SyncError, SyncResult};

pub const MIN_TOTAL_STAMPS: i32 = 1;
pub const MAX_TOTAL_STAMPS: i32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Apple,
    Google,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Apple, Platform::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Apple => "apple",
            Platform::Google => "google",
        }
    }

    /// Resolutions the platform needs for every stamp count.
    pub fn resolutions(&self) -> &'static [Resolution] {
        match self {
            Platform::Apple => &[Resolution::X1, Resolution::X2, Resolution::X3],
            Platform::Google => &[Resolution::Hero],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple" => Ok(Platform::Apple),
            "google" => Ok(Platform::Google),
            other => Err(SyncError::InvariantViolation(format!(
                "unknown platform {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "2x")]
    X2,
    #[serde(rename = "3x")]
    X3,
    #[serde(rename = "hero")]
    Hero,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::X1 => "1x",
            Resolution::X2 => "2x",
            Resolution::X3 => "3x",
            Resolution::Hero => "hero",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1x" => Ok(Resolution::X1),
            "2x" => Ok(Resolution::X2),
            "3x" => Ok(Resolution::X3),
            "hero" => Ok(Resolution::Hero),
            other => Err(SyncError::InvariantViolation(format!(
                "unknown resolution {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StripStatus {
    Ready,
    Regenerating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub stamps: i32,
    pub created_at: DateTime<Utc>,
}

/// Visual attributes that feed the strip renderer. Any change here means
/// every cached strip for the design is stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesignStyle {
    pub background_color: String,
    pub stamp_filled_color: String,
    pub stamp_empty_color: String,
    pub stamp_border_color: String,
    pub icon_color: String,
    pub stamp_icon: String,
    pub reward_icon: String,
    pub strip_background_url: Option<String>,
    pub custom_filled_stamp_url: Option<String>,
    pub custom_empty_stamp_url: Option<String>,
}

impl Default for DesignStyle {
    fn default() -> Self {
        Self {
            background_color: "#8B5A2B".to_string(),
            stamp_filled_color: "#FFFFFF".to_string(),
            stamp_empty_color: "#5C3A1A".to_string(),
            stamp_border_color: "#FFFFFF".to_string(),
            icon_color: "#8B5A2B".to_string(),
            stamp_icon: "checkmark".to_string(),
            reward_icon: "gift".to_string(),
            strip_background_url: None,
            custom_filled_stamp_url: None,
            custom_empty_stamp_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub description: String,
    pub logo_url: Option<String>,
    pub total_stamps: i32,
    pub style: DesignStyle,
    pub is_active: bool,
    pub strip_status: StripStatus,
    pub strip_generation: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Design {
    pub fn validate(&self) -> SyncResult<()> {
        if !(MIN_TOTAL_STAMPS..=MAX_TOTAL_STAMPS).contains(&self.total_stamps) {
            return Err(SyncError::InvariantViolation(format!(
                "design {} has total_stamps {} outside {}..={}",
                self.id, self.total_stamps, MIN_TOTAL_STAMPS, MAX_TOTAL_STAMPS
            )));
        }
        Ok(())
    }

    pub fn check_stamp_count(&self, stamps: i32) -> SyncResult<()> {
        if stamps < 0 || stamps > self.total_stamps {
            return Err(SyncError::InvariantViolation(format!(
                "stamp count {} outside 0..={} for design {}",
                stamps, self.total_stamps, self.id
            )));
        }
        Ok(())
    }

    /// True when moving from `self` to `next` changes what the renderer
    /// would produce. Text-only edits never qualify.
    pub fn rendering_differs(&self, next: &Design) -> bool {
        self.total_stamps != next.total_stamps || self.style != next.style
    }

    pub fn key_space(&self) -> Vec<CacheKey> {
        key_space(self.total_stamps)
    }

    /// Short digest of everything the renderer reads. Cache entries carry
    /// it so strips rendered from an older edit are never reused.
    pub fn render_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.total_stamps.to_le_bytes());
        for part in [
            &self.style.background_color,
            &self.style.stamp_filled_color,
            &self.style.stamp_empty_color,
            &self.style.stamp_border_color,
            &self.style.icon_color,
            &self.style.stamp_icon,
            &self.style.reward_icon,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for part in [
            &self.style.strip_background_url,
            &self.style.custom_filled_stamp_url,
            &self.style.custom_empty_stamp_url,
        ] {
            hasher.update(part.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub stamp_count: i32,
    pub platform: Platform,
    pub resolution: Resolution,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.platform, self.stamp_count, self.resolution)
    }
}

/// Every renderable state for a design with `total_stamps` slots, reward
/// state included.
pub fn key_space(total_stamps: i32) -> Vec<CacheKey> {
    let mut keys = Vec::new();
    for stamp_count in 0..=total_stamps.max(0) {
        for platform in Platform::ALL {
            for resolution in platform.resolutions() {
                keys.push(CacheKey {
                    stamp_count,
                    platform,
                    resolution: *resolution,
                });
            }
        }
    }
    keys
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub design_id: String,
    pub generation: i32,
    pub key: CacheKey,
    pub fingerprint: String,
    pub path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: CacheKey,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSummary {
    pub design_id: String,
    pub generation: i32,
    pub total_keys: usize,
    pub rendered: usize,
    pub reused: usize,
    pub invalidated: usize,
    pub failures: Vec<KeyFailure>,
}

impl CacheSummary {
    pub fn new(design_id: &str, generation: i32, total_keys: usize) -> Self {
        Self {
            design_id: design_id.to_string(),
            generation,
            total_keys,
            rendered: 0,
            reused: 0,
            invalidated: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.rendered + self.reused == self.total_keys
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub customer_id: String,
    pub platform: Platform,
    pub handle: String,
    pub device_library_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Stamp,
    Reward,
    Design,
}

impl NotificationKind {
    /// Empty card (just redeemed) and full card are both reward boundaries.
    pub fn for_stamps(stamps: i32, total_stamps: i32) -> Self {
        if stamps == 0 || stamps >= total_stamps {
            NotificationKind::Reward
        } else {
            NotificationKind::Stamp
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Stamp => "stamp",
            NotificationKind::Reward => "reward",
            NotificationKind::Design => "design",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub customer_id: String,
    pub object_id: String,
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Updated,
    Skipped,
    Failed,
}

/// Per-platform result of a synchronisation attempt. Counts are per handle
/// for push devices and per object for the REST platform.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl Outcome {
    pub fn updated(n: u32) -> Self {
        Self {
            updated: n,
            ..Self::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    pub fn failed(n: u32) -> Self {
        Self {
            failed: n,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: Outcome) {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn status(&self) -> SyncStatus {
        if self.failed > 0 {
            SyncStatus::Failed
        } else if self.updated > 0 {
            SyncStatus::Updated
        } else {
            SyncStatus::Skipped
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformOutcomes {
    pub apple: Outcome,
    pub google: Outcome,
}

impl PlatformOutcomes {
    pub fn set(&mut self, platform: Platform, outcome: Outcome) {
        match platform {
            Platform::Apple => self.apple = outcome,
            Platform::Google => self.google = outcome,
        }
    }

    pub fn merge(&mut self, other: PlatformOutcomes) {
        self.apple.merge(other.apple);
        self.google.merge(other.google);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanoutSummary {
    pub customers: usize,
    pub outcomes: PlatformOutcomes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletReferences {
    pub apple: Option<String>,
    pub google: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallbackAction {
    Register,
    Unregister,
    None,
}

impl CallbackAction {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "save" => CallbackAction::Register,
            "del" => CallbackAction::Unregister,
            _ => CallbackAction::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackResult {
    pub already_processed: bool,
    pub action: CallbackAction,
}

pub fn google_class_id(issuer_id: &str, business_id: &str) -> String {
    format!("{issuer_id}.{business_id}")
}

pub fn google_object_id(issuer_id: &str, customer_id: &str) -> String {
    format!("{issuer_id}.{customer_id}")
}

/// Splits `{issuer}.{customer}` back into the customer id.
pub fn customer_id_from_object(object_id: &str) -> Option<&str> {
    object_id
        .split_once('.')
        .map(|(_, customer)| customer)
        .filter(|customer| !customer.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design(total: i32) -> Design {
        Design {
            id: "des_1".to_string(),
            business_id: "biz_1".to_string(),
            name: "Coffee".to_string(),
            description: "Buy 9 get 1".to_string(),
            logo_url: None,
            total_stamps: total,
            style: DesignStyle::default(),
            is_active: false,
            strip_status: StripStatus::Ready,
            strip_generation: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_key_space_size() {
        assert_eq!(key_space(3).len(), 16, "3 stamps -> 4 states x 4 resolutions");
        assert_eq!(key_space(1).len(), 8);
        assert_eq!(key_space(20).len(), 21 * 4);
    }

    #[test]
    fn test_key_space_includes_reward_state() {
        let keys = key_space(5);
        assert!(keys
            .iter()
            .any(|k| k.stamp_count == 5 && k.platform == Platform::Google));
        assert!(keys.iter().all(|k| (0..=5).contains(&k.stamp_count)));
    }

    #[test]
    fn test_platform_resolutions() {
        assert_eq!(Platform::Apple.resolutions().len(), 3);
        assert_eq!(Platform::Google.resolutions(), &[Resolution::Hero]);
    }

    #[test]
    fn test_resolution_serde_names() {
        let json = serde_json::to_string(&Resolution::X2).unwrap();
        assert_eq!(json, "\"2x\"");
        assert_eq!("hero".parse::<Resolution>().unwrap(), Resolution::Hero);
        assert!("4x".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_design_validate_bounds() {
        assert!(design(1).validate().is_ok());
        assert!(design(20).validate().is_ok());
        assert!(design(0).validate().is_err());
        assert!(design(21).validate().is_err());
    }

    #[test]
    fn test_check_stamp_count() {
        let d = design(10);
        assert!(d.check_stamp_count(0).is_ok());
        assert!(d.check_stamp_count(10).is_ok());
        assert!(matches!(
            d.check_stamp_count(11),
            Err(SyncError::InvariantViolation(_))
        ));
        assert!(d.check_stamp_count(-1).is_err());
    }

    #[test]
    fn test_rendering_differs_ignores_text() {
        let before = design(10);
        let mut after = before.clone();
        after.description = "new copy".to_string();
        after.name = "Renamed".to_string();
        assert!(!before.rendering_differs(&after), "text edits keep strips");

        after.style.stamp_filled_color = "#000000".to_string();
        assert!(before.rendering_differs(&after));
    }

    #[test]
    fn test_rendering_differs_on_total_stamps() {
        let before = design(10);
        let mut after = before.clone();
        after.total_stamps = 8;
        assert!(before.rendering_differs(&after));
    }

    #[test]
    fn test_render_fingerprint_tracks_style() {
        let before = design(10);
        let mut renamed = before.clone();
        renamed.description = "other".to_string();
        assert_eq!(before.render_fingerprint(), renamed.render_fingerprint());
        assert_eq!(before.render_fingerprint().len(), 16);

        let mut recoloured = before.clone();
        recoloured.style.background_color = "#000000".to_string();
        assert_ne!(before.render_fingerprint(), recoloured.render_fingerprint());

        let mut custom = before.clone();
        custom.style.custom_filled_stamp_url = Some("https://cdn/x.png".to_string());
        assert_ne!(before.render_fingerprint(), custom.render_fingerprint());
    }

    #[test]
    fn test_notification_kind_boundaries() {
        assert_eq!(NotificationKind::for_stamps(0, 10), NotificationKind::Reward);
        assert_eq!(NotificationKind::for_stamps(10, 10), NotificationKind::Reward);
        assert_eq!(NotificationKind::for_stamps(4, 10), NotificationKind::Stamp);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(Outcome::updated(2).status(), SyncStatus::Updated);
        assert_eq!(Outcome::skipped().status(), SyncStatus::Skipped);
        assert_eq!(Outcome::default().status(), SyncStatus::Skipped);
        let mut mixed = Outcome::updated(1);
        mixed.merge(Outcome::failed(1));
        assert_eq!(mixed.status(), SyncStatus::Failed);
    }

    #[test]
    fn test_callback_action_mapping() {
        assert_eq!(CallbackAction::from_event_type("save"), CallbackAction::Register);
        assert_eq!(CallbackAction::from_event_type("del"), CallbackAction::Unregister);
        assert_eq!(CallbackAction::from_event_type("expire"), CallbackAction::None);
        assert_eq!(CallbackAction::from_event_type(""), CallbackAction::None);
    }

    #[test]
    fn test_object_id_round_trip() {
        let id = google_object_id("3388000000012345", "cus_abc");
        assert_eq!(id, "3388000000012345.cus_abc");
        assert_eq!(customer_id_from_object(&id), Some("cus_abc"));
        assert_eq!(customer_id_from_object("no-dot"), None);
        assert_eq!(customer_id_from_object("issuer."), None);
    }
}
