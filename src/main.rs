// SPDX-License-Identifier: MPL-2.0

mod atproto;
mod community;
mod config;
mod db;
mod feed;
mod indexer;
mod runtime;
mod server;

use anyhow::Context;
use atproto::FirehoseClient;
use community::CommunityMembers;
use config::Config;
use db::Database;
use feed::FeedContext;
use indexer::Subscription;
use server::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,feedgen=debug"));
    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let config = Config::from_env().context("invalid configuration")?;
    runtime::block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database))?;
    tracing::info!(backend = db.backend(), "storage ready");

    let members = Arc::new(CommunityMembers::new(config.members.iter().cloned()));
    if members.is_open() {
        tracing::warn!("no community members configured, accepting posts from every creator");
    } else {
        tracing::info!(members = members.len(), "community members loaded");
    }

    let client = FirehoseClient::new(&config.subscription_endpoint, config.idle_timeout)
        .context("invalid subscription endpoint")?;
    let subscription = Subscription::new(
        &config.subscription_endpoint,
        client,
        db.clone(),
        members.clone(),
        config.reconnect_delay,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = runtime::spawn(subscription.run(shutdown_rx));

    let state = Arc::new(AppState {
        feed: FeedContext { db, members },
        hostname: config.hostname.clone(),
        publisher_did: config.publisher_did.clone(),
        service_did: config.service_did.clone(),
        default_limit: config.default_limit,
        max_limit: config.max_limit,
    });

    // Dropping the sender (e.g. on a bind error) also stops the runner
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
        tracing::info!("shutting down");
        let _ = shutdown_tx.send(true);
    };
    let served = server::serve(config.listen_addr, state, shutdown).await;

    runner.await.context("subscription task failed")?;
    served.context("server error")?;
    Ok(())
}
