//! chain_relay entry point
//!
//! 1. Loads `.env` and the YAML config (`CONFIG_PATH`, default `config.yaml`)
//! 2. Connects to the RPC node and starts health and idle-cleanup tasks
//! 3. Builds the swap router from the configured providers
//! 4. Watches the balances of the addresses given on the command line
//! 5. Shuts down on Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use chain_relay::adapters::{build_providers, RpcTokenProgramResolver};
use chain_relay::config::{self, constants};
use chain_relay::core::logging::{init_logging, sanitize};
use chain_relay::rpc::{ConnectionManager, SubscriptionKey, SubscriptionRegistry, WsTransport};
use chain_relay::swap::{RpcSubmitter, SignatureConfirmer, SwapRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    info!("chain_relay starting");
    constants::log_configuration();

    let config_path = PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()));
    let config = match config::load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "Configuration failed");
            std::process::exit(1);
        }
    };
    for provider in &config.swap.providers {
        let key = provider.resolved_api_key();
        info!(
            provider = %provider.name,
            kind = %provider.kind,
            base_url = %provider.base_url,
            api_key = %key.as_deref().map(|k| sanitize(k).to_string()).unwrap_or_else(|| "none".to_string()),
            "Provider configured"
        );
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let manager = ConnectionManager::new(config.rpc.clone(), Arc::new(WsTransport::new()));
    let registry = SubscriptionRegistry::new(manager.clone(), config.subscriptions.clone());
    manager
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.rpc.ws_url))?;

    let health_task = manager.spawn_health_monitor(shutdown_tx.subscribe());
    let cleanup_task = registry.spawn_idle_cleanup(shutdown_tx.subscribe());

    let submitter = Arc::new(RpcSubmitter::new(manager.clone()));
    let token_programs = Arc::new(RpcTokenProgramResolver::new(manager.clone()));
    let providers = build_providers(&config.swap.providers, submitter, token_programs);
    let router = SwapRouter::new(
        providers,
        Arc::new(SignatureConfirmer::new(manager.clone(), registry.clone())),
        config.swap.policy.clone(),
        config.swap.confirmation_timeout(),
    );
    info!(providers = ?router.provider_names(), "Swap router ready");

    let mut registrations = Vec::new();
    for address in std::env::args().skip(1) {
        let key = SubscriptionKey::balance(address);
        let watched = key.clone();
        let result = registry
            .subscribe_fn(key, move |event| {
                info!(key = %watched, slot = ?event.payload["context"]["slot"], value = %event.payload["value"], "Balance update");
                Ok(())
            })
            .await;
        match result {
            Ok(registration) => registrations.push(registration),
            Err(e) => warn!(error = %e, "Could not watch address, poll it instead"),
        }
    }
    info!(watching = registrations.len(), "Subscriptions registered");

    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("[SHUTDOWN] Graceful shutdown initiated");
                let _ = shutdown_signal.send(());
            }
            Err(err) => error!(error = %err, "Failed to listen for Ctrl+C"),
        }
    });

    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;

    for registration in &registrations {
        registry.unsubscribe(registration.id()).await;
    }
    manager.disconnect().await;
    let _ = tokio::join!(health_task, cleanup_task);

    let stats = registry.stats().await;
    info!(?stats, "[SHUTDOWN] Clean exit");
    Ok(())
}
