use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use stampsync_core::types::{
    Business, CacheEntry, CacheKey, Customer, Design, DesignStyle, Platform, Registration,
    Resolution, StripStatus,
};
use stampsync_core::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "strip_status", rename_all = "lowercase")]
pub enum StripStatusKind {
    Ready,
    Regenerating,
}

impl From<StripStatus> for StripStatusKind {
    fn from(status: StripStatus) -> Self {
        match status {
            StripStatus::Ready => StripStatusKind::Ready,
            StripStatus::Regenerating => StripStatusKind::Regenerating,
        }
    }
}

impl From<StripStatusKind> for StripStatus {
    fn from(status: StripStatusKind) -> Self {
        match status {
            StripStatusKind::Ready => StripStatus::Ready,
            StripStatusKind::Regenerating => StripStatus::Regenerating,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "wallet_platform", rename_all = "lowercase")]
pub enum WalletPlatform {
    Apple,
    Google,
}

impl From<Platform> for WalletPlatform {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Apple => WalletPlatform::Apple,
            Platform::Google => WalletPlatform::Google,
        }
    }
}

impl From<WalletPlatform> for Platform {
    fn from(platform: WalletPlatform) -> Self {
        match platform {
            WalletPlatform::Apple => Platform::Apple,
            WalletPlatform::Google => Platform::Google,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BusinessRow {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<BusinessRow> for Business {
    fn from(row: BusinessRow) -> Self {
        Business {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CustomerRow {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub stamps: i32,
    pub created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            business_id: row.business_id,
            name: row.name,
            stamps: row.stamps,
            created_at: row.created_at,
        }
    }
}

/// `card_designs` keeps the style flat, one column per field.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DesignRow {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub description: String,
    pub logo_url: Option<String>,
    pub total_stamps: i32,
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
    pub is_active: bool,
    pub strip_status: StripStatusKind,
    pub strip_generation: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DesignRow> for Design {
    fn from(row: DesignRow) -> Self {
        Design {
            id: row.id,
            business_id: row.business_id,
            name: row.name,
            description: row.description,
            logo_url: row.logo_url,
            total_stamps: row.total_stamps,
            style: DesignStyle {
                background_color: row.background_color,
                stamp_filled_color: row.stamp_filled_color,
                stamp_empty_color: row.stamp_empty_color,
                stamp_border_color: row.stamp_border_color,
                icon_color: row.icon_color,
                stamp_icon: row.stamp_icon,
                reward_icon: row.reward_icon,
                strip_background_url: row.strip_background_url,
                custom_filled_stamp_url: row.custom_filled_stamp_url,
                custom_empty_stamp_url: row.custom_empty_stamp_url,
            },
            is_active: row.is_active,
            strip_status: row.strip_status.into(),
            strip_generation: row.strip_generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StripImageRow {
    pub design_id: String,
    pub generation: i32,
    pub stamp_count: i32,
    pub platform: WalletPlatform,
    pub resolution: String,
    pub fingerprint: String,
    pub path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StripImageRow> for CacheEntry {
    type Error = SyncError;

    fn try_from(row: StripImageRow) -> SyncResult<Self> {
        let resolution: Resolution = row.resolution.parse()?;
        Ok(CacheEntry {
            design_id: row.design_id,
            generation: row.generation,
            key: CacheKey {
                stamp_count: row.stamp_count,
                platform: row.platform.into(),
                resolution,
            },
            fingerprint: row.fingerprint,
            path: row.path,
            url: row.url,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistrationRow {
    pub id: String,
    pub customer_id: String,
    pub platform: WalletPlatform,
    pub handle: String,
    pub device_library_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RegistrationRow> for Registration {
    fn from(row: RegistrationRow) -> Self {
        Registration {
            id: row.id,
            customer_id: row.customer_id,
            platform: row.platform.into(),
            handle: row.handle,
            device_library_id: row.device_library_id,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_row(resolution: &str) -> StripImageRow {
        StripImageRow {
            design_id: "des_1".to_string(),
            generation: 3,
            stamp_count: 2,
            platform: WalletPlatform::Apple,
            resolution: resolution.to_string(),
            fingerprint: "00ff00ff00ff00ff".to_string(),
            path: "biz_1/cards/des_1/strips/g3/apple/strip_2@2x.png".to_string(),
            url: "https://cdn.example.test/strip_2@2x.png".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_strip_row_converts_to_entry() {
        let entry = CacheEntry::try_from(strip_row("2x")).unwrap();
        assert_eq!(entry.generation, 3);
        assert_eq!(
            entry.key,
            CacheKey {
                stamp_count: 2,
                platform: Platform::Apple,
                resolution: Resolution::X2,
            }
        );
    }

    #[test]
    fn test_strip_row_with_unknown_resolution_is_rejected() {
        assert!(CacheEntry::try_from(strip_row("4x")).is_err());
    }

    #[test]
    fn test_enum_mappings_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::from(WalletPlatform::from(platform)), platform);
        }
        for status in [StripStatus::Ready, StripStatus::Regenerating] {
            assert_eq!(StripStatus::from(StripStatusKind::from(status)), status);
        }
    }
}
