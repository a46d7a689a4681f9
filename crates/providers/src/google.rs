//! Google Wallet REST client and save-link signer.
//!
//! Objects are written with PATCH first; a 404 means the customer saved a
//! link but the object was never inserted, so it is created. A 409 on
//! create means someone else created it in between, which is fine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampsync_core::ports::{GoogleWalletApi, ObjectWrite};
use stampsync_core::{SyncError, SyncResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{status_error, transport_error};

pub const WALLET_SCOPE: &str = "https://www.googleapis.com/auth/wallet_object.issuer";

#[derive(Serialize)]
struct SaveClaims<'a> {
    iss: &'a str,
    aud: &'static str,
    typ: &'static str,
    iat: i64,
    origins: &'a [String],
    payload: &'a Value,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'static str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Holds the service account key. Signs save-to-wallet links and the
/// assertions exchanged for API access tokens.
pub struct SaveTokenSigner {
    service_account_email: String,
    key: EncodingKey,
    origins: Vec<String>,
}

impl SaveTokenSigner {
    pub fn from_pem(
        service_account_email: &str,
        private_key_pem: &[u8],
        origins: Vec<String>,
    ) -> SyncResult<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| SyncError::Config(format!("google private key: {}", e)))?;
        Ok(Self {
            service_account_email: service_account_email.to_string(),
            key,
            origins,
        })
    }

    pub fn sign_save(&self, payload: &Value, issued_at: DateTime<Utc>) -> SyncResult<String> {
        let claims = SaveClaims {
            iss: &self.service_account_email,
            aud: "google",
            typ: "savetowallet",
            iat: issued_at.timestamp(),
            origins: &self.origins,
            payload,
        };
        self.encode(&claims)
    }

    fn sign_assertion(&self, token_url: &str, issued_at: DateTime<Utc>) -> SyncResult<String> {
        let claims = AssertionClaims {
            iss: &self.service_account_email,
            scope: WALLET_SCOPE,
            aud: token_url,
            iat: issued_at.timestamp(),
            exp: (issued_at + Duration::hours(1)).timestamp(),
        };
        self.encode(&claims)
    }

    fn encode<T: Serialize>(&self, claims: &T) -> SyncResult<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &self.key)
            .map_err(|e| SyncError::Config(format!("jwt signing failed: {}", e)))
    }
}

/// How API calls authenticate.
pub enum AccessToken {
    /// Pre-issued bearer token, mostly for local runs against a fake.
    Static(String),
    /// JWT-bearer grant against the token endpoint using the signer's key.
    ServiceAccount { token_url: String },
    None,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

pub struct GoogleWalletClient {
    client: reqwest::Client,
    base_url: String,
    signer: Option<SaveTokenSigner>,
    access: AccessToken,
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleWalletClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        signer: Option<SaveTokenSigner>,
        access: AccessToken,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            access,
            cached: Mutex::new(None),
        }
    }

    async fn bearer(&self) -> SyncResult<Option<String>> {
        let token_url = match &self.access {
            AccessToken::None => return Ok(None),
            AccessToken::Static(token) => return Ok(Some(token.clone())),
            AccessToken::ServiceAccount { token_url } => token_url,
        };

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > now) {
            return Ok(Some(token.value.clone()));
        }

        let signer = self.signer.as_ref().ok_or_else(|| {
            SyncError::Config("service account access needs a private key".to_string())
        })?;
        let assertion = signer.sign_assertion(token_url, now)?;
        let resp = self
            .client
            .post(token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("google oauth", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("google oauth", status, &body));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::TransientRemote(format!("google oauth response: {}", e)))?;

        info!(expires_in = token.expires_in, "google access token refreshed");
        // refresh a minute before expiry
        let refresh_at = now + Duration::seconds((token.expires_in - 60).max(0));
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at,
        });
        Ok(Some(value))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> SyncResult<(StatusCode, String)> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method, &url).json(body);
        if let Some(token) = self.bearer().await? {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| transport_error("google wallet", e))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Ok((status, text))
    }

    async fn insert(&self, collection: &str, body: &Value) -> SyncResult<()> {
        let (status, text) = self.send(reqwest::Method::POST, collection, body).await?;
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            debug!(collection, "google resource already exists");
            return Ok(());
        }
        Err(status_error("google wallet", status, &text))
    }
}

#[async_trait]
impl GoogleWalletApi for GoogleWalletClient {
    async fn patch_object(&self, object_id: &str, object: &Value) -> SyncResult<ObjectWrite> {
        let (status, text) = self
            .send(
                reqwest::Method::PATCH,
                &format!("genericObject/{}", object_id),
                object,
            )
            .await?;
        if status.is_success() {
            return Ok(ObjectWrite::Updated);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(ObjectWrite::Missing);
        }
        Err(status_error("google wallet", status, &text))
    }

    async fn insert_object(&self, object: &Value) -> SyncResult<()> {
        self.insert("genericObject", object).await
    }

    async fn upsert_class(&self, class_id: &str, class: &Value) -> SyncResult<()> {
        let (status, text) = self
            .send(
                reqwest::Method::PATCH,
                &format!("genericClass/{}", class_id),
                class,
            )
            .await?;
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return self.insert("genericClass", class).await;
        }
        Err(status_error("google wallet", status, &text))
    }

    fn sign_save_token(&self, payload: &Value) -> SyncResult<String> {
        match &self.signer {
            Some(signer) => signer.sign_save(payload, Utc::now()),
            None => Err(SyncError::Config(
                "google save links need a service account key".to_string(),
            )),
        }
    }
}
