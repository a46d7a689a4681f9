use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: String,
    pub stampsync_env: String,
    pub api_bind: String,
    pub internal_token: Option<String>,
    pub fanout_concurrency: usize,
    pub render_concurrency: usize,
    pub regeneration_workers: usize,
    pub remote_timeout_secs: u64,
    pub callback_secret: Option<String>,
    pub pass_auth_secret: Option<String>,
    pub public_base_url: String,
    pub google_issuer_id: String,
    pub google_service_account_email: String,
    pub google_private_key_path: Option<String>,
    pub google_api_base: String,
    pub google_access_token: Option<String>,
    pub google_token_url: String,
    pub google_origins: Vec<String>,
    pub apns_base_url: String,
    pub apns_topic: String,
    pub apns_auth_token: Option<String>,
    pub render_service_url: String,
    pub storage_base_url: String,
    pub storage_bucket: String,
    pub storage_token: Option<String>,
    pub nonce_retention_days: i64,
    pub google_notify_limit: u32,
    pub google_notify_window_hours: i64,
    pub reap_interval_secs: u64,
    pub stale_regeneration_secs: i64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub fn from_env() -> Result<Self, SyncError> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("STAMPSYNC_DATABASE_URL"))
            .map_err(|_| SyncError::Config("DATABASE_URL must be set".to_string()))?;
        let redis_url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("STAMPSYNC_REDIS_URL"))
            .map_err(|_| SyncError::Config("REDIS_URL must be set".to_string()))?;

        let fanout_concurrency: usize = env_or("STAMPSYNC_FANOUT_CONCURRENCY", 16);
        let google_origins = env_optional("STAMPSYNC_GOOGLE_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            redis_url,
            stampsync_env: env_string("STAMPSYNC_ENV", "dev"),
            api_bind: env_string("STAMPSYNC_API_BIND", "0.0.0.0:3000"),
            internal_token: env_optional("STAMPSYNC_INTERNAL_TOKEN"),
            fanout_concurrency: fanout_concurrency.clamp(1, 64),
            render_concurrency: env_or::<usize>("STAMPSYNC_RENDER_CONCURRENCY", 4).max(1),
            regeneration_workers: env_or::<usize>("STAMPSYNC_REGENERATION_WORKERS", 2).max(1),
            remote_timeout_secs: env_or("STAMPSYNC_REMOTE_TIMEOUT_SECS", 30),
            callback_secret: env_optional("STAMPSYNC_CALLBACK_SECRET"),
            pass_auth_secret: env_optional("STAMPSYNC_PASS_AUTH_SECRET"),
            public_base_url: env_string("STAMPSYNC_PUBLIC_BASE_URL", "http://localhost:3000"),
            google_issuer_id: env_string("STAMPSYNC_GOOGLE_ISSUER_ID", ""),
            google_service_account_email: env_string("STAMPSYNC_GOOGLE_SERVICE_ACCOUNT_EMAIL", ""),
            google_private_key_path: env_optional("STAMPSYNC_GOOGLE_PRIVATE_KEY_PATH"),
            google_api_base: env_string(
                "STAMPSYNC_GOOGLE_API_BASE",
                "https://walletobjects.googleapis.com/walletobjects/v1",
            ),
            google_access_token: env_optional("STAMPSYNC_GOOGLE_ACCESS_TOKEN"),
            google_token_url: env_string(
                "STAMPSYNC_GOOGLE_TOKEN_URL",
                "https://oauth2.googleapis.com/token",
            ),
            google_origins,
            apns_base_url: env_string("STAMPSYNC_APNS_BASE_URL", "https://api.push.apple.com"),
            apns_topic: env_string("STAMPSYNC_APNS_TOPIC", ""),
            apns_auth_token: env_optional("STAMPSYNC_APNS_AUTH_TOKEN"),
            render_service_url: env_string("STAMPSYNC_RENDER_URL", "http://localhost:8080"),
            storage_base_url: env_string("STAMPSYNC_STORAGE_URL", "http://localhost:9000"),
            storage_bucket: env_string("STAMPSYNC_STORAGE_BUCKET", "businesses"),
            storage_token: env_optional("STAMPSYNC_STORAGE_TOKEN"),
            nonce_retention_days: env_or("STAMPSYNC_NONCE_RETENTION_DAYS", 7),
            google_notify_limit: env_or("STAMPSYNC_GOOGLE_NOTIFY_LIMIT", 3),
            google_notify_window_hours: env_or("STAMPSYNC_GOOGLE_NOTIFY_WINDOW_HOURS", 24),
            reap_interval_secs: env_or("STAMPSYNC_REAP_INTERVAL_SECS", 3600),
            stale_regeneration_secs: env_or("STAMPSYNC_STALE_REGENERATION_SECS", 900),
        })
    }

    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            remote_timeout: Duration::from_secs(self.remote_timeout_secs.max(1)),
            fanout_concurrency: self.fanout_concurrency.clamp(1, 64),
            render_concurrency: self.render_concurrency.max(1),
            regeneration_workers: self.regeneration_workers.max(1),
            google_notify_limit: self.google_notify_limit,
            google_notify_window: chrono::Duration::hours(self.google_notify_window_hours),
            nonce_retention: chrono::Duration::days(self.nonce_retention_days),
        }
    }

    pub fn identity(&self) -> WalletIdentity {
        WalletIdentity {
            google_issuer_id: self.google_issuer_id.clone(),
            public_base_url: self.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Knobs the synchronisation core runs with.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub remote_timeout: Duration,
    pub fanout_concurrency: usize,
    pub render_concurrency: usize,
    pub regeneration_workers: usize,
    pub google_notify_limit: u32,
    pub google_notify_window: chrono::Duration,
    pub nonce_retention: chrono::Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(30),
            fanout_concurrency: 16,
            render_concurrency: 4,
            regeneration_workers: 2,
            google_notify_limit: 3,
            google_notify_window: chrono::Duration::hours(24),
            nonce_retention: chrono::Duration::days(7),
        }
    }
}

/// Public identifiers baked into save links and provider object ids.
#[derive(Debug, Clone)]
pub struct WalletIdentity {
    pub google_issuer_id: String,
    pub public_base_url: String,
}
