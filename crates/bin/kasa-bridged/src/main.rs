//! # kasa-bridged: kasa bridge daemon
//!
//! Composition root that wires the adapters together and runs the bridge.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Connect to the MQTT broker with the bridge's last will
//! - Build the selected device protocol (Kasa LAN or virtual)
//! - Optionally report readiness and watchdog keep-alives to systemd
//! - Run the bridge until SIGTERM/SIGINT, then disconnect cleanly
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;
#[cfg(unix)]
mod watchdog;

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use kasa_bridge_adapter_kasa::KasaProtocol;
use kasa_bridge_adapter_mqtt::MqttBus;
use kasa_bridge_adapter_virtual::VirtualProtocol;
use kasa_bridge_app::bridge::Bridge;
use kasa_bridge_app::ports::{DeviceProtocol, MessagePublisher, MessageSubscriber};
use kasa_bridge_app::services::presence::last_will;
use kasa_bridge_app::settings::BridgeSettings;

use crate::config::{Config, ProtocolKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    let settings = config.bridge_settings()?;
    let bus = Arc::new(MqttBus::connect(
        &config.mqtt,
        Some(&last_will(&settings.topic_prefix)),
    ));

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let watchdog = if config.bridge.systemd_notify {
        spawn_watchdog(settings.heartbeat_interval, shutdown.clone())
    } else {
        None
    };

    match config.protocol.kind {
        ProtocolKind::Kasa => {
            let protocol = KasaProtocol::new(config.protocol.kasa.clone());
            tracing::info!(
                account = protocol.credentials().map(|c| c.username.as_str()),
                "using the Kasa LAN protocol"
            );
            serve(settings, protocol, Arc::clone(&bus), shutdown).await;
        }
        ProtocolKind::Virtual => {
            tracing::info!("using the simulated device network");
            let protocol = Arc::new(VirtualProtocol::demo()?);
            serve(settings, protocol, Arc::clone(&bus), shutdown).await;
        }
    }

    if let Some(watchdog) = watchdog {
        let _ = watchdog.await;
    }
    bus.disconnect().await;
    Ok(())
}

#[cfg(unix)]
fn spawn_watchdog(
    interval: std::time::Duration,
    shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    match watchdog::Notifier::from_env() {
        Ok(Some(notifier)) => Some(tokio::spawn(async move {
            notifier.run(interval, shutdown).await;
        })),
        Ok(None) => {
            tracing::warn!("systemd notifications enabled but NOTIFY_SOCKET is not set");
            None
        }
        Err(err) => {
            tracing::warn!(error = %err, "cannot use the systemd notify socket");
            None
        }
    }
}

#[cfg(not(unix))]
fn spawn_watchdog(
    _interval: std::time::Duration,
    _shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    tracing::warn!("systemd notifications are only available on unix");
    None
}

async fn serve<P, B>(settings: BridgeSettings, protocol: P, bus: B, shutdown: watch::Receiver<bool>)
where
    P: DeviceProtocol + Clone + 'static,
    B: MessagePublisher + MessageSubscriber + Clone + 'static,
{
    Bridge::new(settings, protocol, bus).run(shutdown).await;
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
