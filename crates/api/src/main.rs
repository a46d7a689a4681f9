use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stampsync_core::clock::SystemClock;
use stampsync_core::config::Settings;
use stampsync_core::{Collaborators, WalletSync};
use stampsync_db::{PgStore, RedisNotificationLedger};
use stampsync_providers::{
    google::AccessToken, http_client, ApnsClient, GoogleWalletClient, HttpObjectStorage,
    HttpRenderer, SaveTokenSigner,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

mod error;
mod middleware;
mod routes;
mod state;

use crate::state::{AppState, AuthConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;
    let sync = build_sync(&settings).await?;

    let state = AppState {
        sync,
        auth: Arc::new(AuthConfig::from_settings(&settings)),
    };
    if state.auth.internal_token.is_none() {
        warn!("STAMPSYNC_INTERNAL_TOKEN unset, internal event endpoints will refuse requests");
    }

    let app = routes::app(state);
    let addr: SocketAddr = settings.api_bind.parse()?;
    info!(%addr, env = %settings.stampsync_env, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Wires Postgres, Redis and the provider clients into the sync core.
async fn build_sync(settings: &Settings) -> anyhow::Result<WalletSync> {
    let policy = settings.policy();
    let pool = stampsync_db::connect(&settings.database_url, 10, policy.remote_timeout).await?;
    stampsync_db::migrate(&pool).await?;
    let store = Arc::new(PgStore::new(pool));

    let redis = redis::Client::open(settings.redis_url.as_str())?;
    let notifications = Arc::new(RedisNotificationLedger::new(
        redis,
        policy.google_notify_window,
        policy.remote_timeout,
    ));

    let client = http_client(Duration::from_secs(settings.remote_timeout_secs))?;
    let signer = match &settings.google_private_key_path {
        Some(path) => {
            let pem = tokio::fs::read(path).await?;
            Some(SaveTokenSigner::from_pem(
                &settings.google_service_account_email,
                &pem,
                settings.google_origins.clone(),
            )?)
        }
        None => {
            warn!("no google service account key, save links are disabled");
            None
        }
    };
    let access = match (&settings.google_access_token, &signer) {
        (Some(token), _) => AccessToken::Static(token.clone()),
        (None, Some(_)) => AccessToken::ServiceAccount {
            token_url: settings.google_token_url.clone(),
        },
        (None, None) => AccessToken::None,
    };

    let collaborators = Collaborators {
        designs: store.clone(),
        strips: store.clone(),
        registrations: store.clone(),
        nonces: store,
        notifications,
        renderer: Arc::new(HttpRenderer::new(client.clone(), &settings.render_service_url)),
        storage: Arc::new(HttpObjectStorage::new(
            client.clone(),
            &settings.storage_base_url,
            &settings.storage_bucket,
            settings.storage_token.clone(),
        )),
        push: Arc::new(ApnsClient::new(
            client.clone(),
            &settings.apns_base_url,
            &settings.apns_topic,
            settings.apns_auth_token.clone(),
        )?),
        google: Arc::new(GoogleWalletClient::new(
            client,
            &settings.google_api_base,
            signer,
            access,
        )),
        clock: Arc::new(SystemClock),
    };
    Ok(WalletSync::assemble(collaborators, policy, settings.identity()))
}
