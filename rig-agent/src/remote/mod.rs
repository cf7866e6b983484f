//! The persistent backend channel: session manager and RPC engine.
//!
//! [`RemoteChannel`] is the application-facing handle. It owns the state
//! shared across reconnects (credentials, heartbeat timers, the handle to
//! the live session's outbound queue) and runs the watchdog, which runs
//! one [`session::Session`] at a time over the websocket transport.
//!
//! Threading model: the transport reader task and external notifier
//! threads only enqueue — into the inbound queue and the heartbeat cells
//! respectively. The pump loop inside the session is the single consumer
//! and the only writer of session-scoped state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::rig::{RigBackend, RigEvent};
use crate::types::LockedCell;

pub mod credentials;
pub mod error;
pub mod heartbeat;
pub mod messages;
pub mod notifications;
pub mod rpc;
pub mod session;
pub mod status;
pub mod transport;
pub mod watchdog;

use credentials::LoginCredentials;
use heartbeat::HeartbeatSchedule;
use messages::{OutboundBatch, OutboundCommand};
use rpc::CredentialUpdate;

/// Delay between an external state-change signal and the status send it
/// requests.
const NOTIFY_DELAY: Duration = Duration::from_secs(1);

/// State shared between the public handle, the watchdog and sessions.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn RigBackend>,
    pub(crate) events: mpsc::UnboundedSender<RigEvent>,
    /// Process-wide login identity; read fresh at every connect.
    pub(crate) credentials: LockedCell<LoginCredentials>,
    pub(crate) heartbeat: HeartbeatSchedule,
    /// Set while an RPC is mid-flight; suppresses state-change notifies so
    /// heartbeats never interleave with an RPC's own status send.
    pub(crate) in_rpc: LockedCell<bool>,
    /// Sender into the live session's outbound queue; `None` between
    /// sessions. Replaced wholesale on every reconnect.
    pub(crate) outbound: LockedCell<Option<mpsc::UnboundedSender<OutboundBatch>>>,
}

impl Shared {
    pub(crate) fn new(
        backend: Arc<dyn RigBackend>,
        events: mpsc::UnboundedSender<RigEvent>,
        credentials: LoginCredentials,
    ) -> Self {
        Self {
            backend,
            events,
            credentials: LockedCell::new(credentials),
            heartbeat: HeartbeatSchedule::new(),
            in_rpc: LockedCell::new(false),
            outbound: LockedCell::new(None),
        }
    }

    /// Enqueue one batch into the live session, if any. Batches enqueued
    /// between sessions are dropped, matching a send into a dead socket.
    pub(crate) fn enqueue(&self, batch: OutboundBatch) {
        if let Some(tx) = self.outbound.get() {
            let _ = tx.send(batch);
        }
    }

    pub(crate) fn build_status(&self, include_names: bool) -> String {
        status::build_status(
            self.backend.rig_status(),
            &self.backend.devices(),
            include_names,
        )
    }

    /// Commit a credential change to the shared login and schedule the
    /// close-and-reconnect that makes the next login carry it.
    pub(crate) fn apply_credentials(&self, update: CredentialUpdate) {
        self.credentials.update(move |creds| update.apply(creds));
        self.enqueue(vec![OutboundCommand::Close(
            "Credentials change, reconnecting".to_string(),
        )]);
    }
}

/// Application-facing handle on the remote channel.
#[derive(Clone)]
pub struct RemoteChannel {
    shared: Arc<Shared>,
}

impl RemoteChannel {
    pub fn new(
        backend: Arc<dyn RigBackend>,
        events: mpsc::UnboundedSender<RigEvent>,
        credentials: LoginCredentials,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(backend, events, credentials)),
        }
    }

    /// Signal that rig state changed and a status send should follow
    /// shortly. Safe to call from any thread; ignored while an RPC is in
    /// flight because the RPC epilogue sends a status of its own.
    pub fn notify_state_changed(&self) {
        if !self.shared.in_rpc.get() {
            self.shared
                .heartbeat
                .request_notify(Instant::now() + NOTIFY_DELAY);
        }
    }

    /// Change credentials locally (UI path) and reconnect so the backend
    /// sees the new login.
    pub fn set_credentials(
        &self,
        btc: Option<String>,
        worker: Option<String>,
        group: Option<String>,
    ) {
        self.shared.apply_credentials(CredentialUpdate {
            btc,
            worker,
            group,
        });
    }

    pub fn credentials(&self) -> LoginCredentials {
        self.shared.credentials.get()
    }

    /// Run the channel until `cancel` fires: connect, pump, reconnect with
    /// backoff, forever.
    pub async fn run(&self, address: &str, cancel: CancellationToken) {
        watchdog::run(
            self.shared.clone(),
            &transport::WsConnector,
            address,
            cancel,
        )
        .await;
    }
}
