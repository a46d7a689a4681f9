use anyhow::Result;
use clap::{Parser, Subcommand};
use stampsync_core::clock::SystemClock;
use stampsync_core::config::Settings;
use stampsync_core::{Collaborators, WalletSync};
use stampsync_db::{PgStore, RedisNotificationLedger};
use stampsync_providers::{
    google::AccessToken, http_client, ApnsClient, GoogleWalletClient, HttpObjectStorage,
    HttpRenderer, SaveTokenSigner,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod jobs;

use crate::jobs::{reaper, Maintenance, Schedule};

#[derive(Debug, Parser)]
#[command(name = "stampsync-worker")]
#[command(about = "Wallet sync maintenance: ledger reaping and stalled regenerations", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Run the maintenance loop (default).
    Run,
    /// Reap expired nonces and notification records once.
    Reap,
    /// Regenerate one design's strips and re-sync its customers.
    Regenerate {
        design_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;
    let sync = build_sync(&settings).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let schedule = Schedule {
                reap_every: chrono::Duration::seconds(settings.reap_interval_secs as i64),
                stale_after: chrono::Duration::seconds(settings.stale_regeneration_secs),
            };
            info!(?schedule, "worker starting");
            Maintenance::new(sync, schedule).run().await;
        }
        Command::Reap => {
            let report = reaper::reap_ledgers(&sync).await?;
            println!("{}", report.to_json());
        }
        Command::Regenerate { design_id } => {
            let report = sync.coordinator.retry_regeneration(&design_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.cache.is_complete() {
                anyhow::bail!(
                    "design {} still has {} strips missing",
                    design_id,
                    report.cache.failures.len()
                );
            }
        }
    }
    Ok(())
}

async fn build_sync(settings: &Settings) -> Result<WalletSync> {
    let policy = settings.policy();
    let pool = stampsync_db::connect(&settings.database_url, 5, policy.remote_timeout).await?;
    let store = Arc::new(PgStore::new(pool));

    let redis = redis::Client::open(settings.redis_url.as_str())?;
    let notifications = Arc::new(RedisNotificationLedger::new(
        redis,
        policy.google_notify_window,
        policy.remote_timeout,
    ));

    let client = http_client(Duration::from_secs(settings.remote_timeout_secs))?;
    let signer = match &settings.google_private_key_path {
        Some(path) => Some(SaveTokenSigner::from_pem(
            &settings.google_service_account_email,
            &tokio::fs::read(path).await?,
            settings.google_origins.clone(),
        )?),
        None => None,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["stampsync-worker"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_regenerate_takes_design_id() {
        let cli = Cli::try_parse_from(["stampsync-worker", "regenerate", "des_1"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Regenerate {
                design_id: "des_1".to_string()
            })
        );
    }

    #[test]
    fn test_regenerate_requires_design_id() {
        assert!(Cli::try_parse_from(["stampsync-worker", "regenerate"]).is_err());
    }

    #[test]
    fn test_reap_subcommand() {
        let cli = Cli::try_parse_from(["stampsync-worker", "reap"]).unwrap();
        assert_eq!(cli.command, Some(Command::Reap));
    }
}
