//! Rig agent daemon.
//!
//! Wires a demo in-memory rig to the coordination backend and logs the
//! events fanned out over the channel. Configuration comes from the
//! environment:
//!
//!   RIG_AGENT_WS_URL   backend websocket address
//!   RIG_AGENT_RIG_ID   stable rig identifier
//!   RIG_AGENT_BTC      payment address (heartbeats stay off without one)
//!   RIG_AGENT_WORKER   worker name

use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rig_agent::rig::memory::InMemoryRig;
use rig_agent::rig::{DeviceState, DeviceType};
use rig_agent::{LoginCredentials, RemoteChannel, RigEvent};

const DEFAULT_WS_URL: &str = "wss://127.0.0.1:3000/v3";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let address = env::var("RIG_AGENT_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let rig_id = env::var("RIG_AGENT_RIG_ID").unwrap_or_else(|_| "rig-local".to_string());
    let mut credentials = LoginCredentials::new(rig_id);
    credentials.btc = env::var("RIG_AGENT_BTC").ok();
    credentials.worker = env::var("RIG_AGENT_WORKER").ok();
    if credentials.btc.is_some() && !credentials.has_valid_btc() {
        warn!("RIG_AGENT_BTC is not a valid mainnet address; status reports stay off");
    }

    let rig = Arc::new(InMemoryRig::new());
    rig.add_device("gpu0", "Demo GPU 0", DeviceType::Nvidia, DeviceState::Stopped);
    rig.set_initialized(true);

    let (events, mut events_rx) = mpsc::unbounded_channel();
    let channel = RemoteChannel::new(rig, events, credentials);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    let logger = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                RigEvent::ConnectionChanged(connected) => {
                    info!(connected, "Backend connection changed");
                }
                RigEvent::Burn(message) => warn!(message = %message, "Burn requested"),
                RigEvent::VersionAvailable(version) => {
                    info!(version = %version, "Update available");
                }
                RigEvent::BalanceUpdated(btc) => info!(btc, "Balance updated"),
                RigEvent::ExchangeRatesUpdated { usd_btc_rate, .. } => {
                    info!(usd_btc_rate, "Exchange rates updated");
                }
            }
        }
    });

    channel.run(&address, cancel).await;
    logger.abort();
    Ok(())
}
