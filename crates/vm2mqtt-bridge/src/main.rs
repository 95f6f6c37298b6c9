//! vm2mqtt - expose VMs, containers and stacks to Home Assistant over MQTT.
//!
//! Configuration is read from the environment; see [`AppConfig`] for the
//! variables. The process runs until SIGINT or SIGTERM, then withdraws every
//! unit from the broker before exiting.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vm2mqtt_bridge::{AppConfig, Bridge, MqttGateway};
use vm2mqtt_inventory::{InventoryProvider, PortainerProvider, ProxmoxProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vm2mqtt=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vm2mqtt");

    let config = AppConfig::from_env()?;
    tracing::info!(
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        discovery_prefix = %config.bridge.discovery_prefix,
        bridge_prefix = %config.bridge.bridge_prefix,
        refresh_interval_seconds = config.bridge.refresh_interval_seconds,
        retract_missing = config.bridge.retract_missing,
        "Loaded configuration"
    );

    let mut providers: Vec<Arc<dyn InventoryProvider>> = Vec::new();
    if let Some(proxmox) = &config.proxmox {
        tracing::info!(host = %proxmox.host, vmids = ?proxmox.vmids, "Proxmox provider enabled");
        providers.push(Arc::new(ProxmoxProvider::new(proxmox)?));
    }
    if let Some(portainer) = &config.portainer {
        tracing::info!(url = %portainer.url, "Portainer provider enabled");
        providers.push(Arc::new(PortainerProvider::new(portainer)?));
    }
    if providers.is_empty() {
        tracing::warn!("No inventory provider configured, nothing will be announced");
    }

    let (gateway, inbound) = MqttGateway::connect(&config.mqtt).await?;
    let bridge = Bridge::new(Arc::new(gateway), config.bridge.clone());

    for provider in providers {
        bridge.hook(provider).await?;
    }
    bridge.start().await?;

    bridge.run(inbound, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
