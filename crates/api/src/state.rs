use std::sync::Arc;

use stampsync_core::config::Settings;
use stampsync_core::WalletSync;

#[derive(Clone)]
pub struct AppState {
    pub sync: WalletSync,
    pub auth: Arc<AuthConfig>,
}

/// Secrets and identifiers the HTTP surface checks requests against.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Bearer token for the internal event endpoints. Unset disables them.
    pub internal_token: Option<String>,
    /// HMAC secret for provider callbacks. Unset accepts unsigned callbacks.
    pub callback_secret: Option<String>,
    /// Key the `ApplePass` tokens are derived from.
    pub pass_auth_secret: Option<String>,
    pub pass_type_id: String,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            internal_token: settings.internal_token.clone(),
            callback_secret: settings.callback_secret.clone(),
            pass_auth_secret: settings.pass_auth_secret.clone(),
            pass_type_id: settings.apns_topic.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
