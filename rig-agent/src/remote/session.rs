//! One connection's lifetime.
//!
//! A session connects, enqueues the login pair, then runs the pump loop:
//! each tick drains one outbound batch, handles one inbound frame, and
//! polls the heartbeat scheduler. The pump is the only consumer of both
//! queues and the only writer of session-scoped state, so RPCs are
//! strictly one-at-a-time and the status-then-reply order can never
//! interleave with a heartbeat.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rig::RigEvent;

use super::Shared;
use super::messages::{OutboundBatch, OutboundCommand, method_of};
use super::notifications::NotificationDispatcher;
use super::rpc::{RpcDispatcher, RpcMethod};
use super::transport::{Connector, Transport};

/// Pump loop tick.
pub(crate) const PUMP_TICK: Duration = Duration::from_millis(50);

/// Why the pump loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Deliberate close (credential change); reconnect without backoff.
    Restart,
    /// Transport died or the server closed; reconnect after backoff.
    Closed,
    /// Shutdown was requested.
    Cancelled,
}

pub(crate) struct Session {
    shared: Arc<Shared>,
    rpc: RpcDispatcher,
    notifications: NotificationDispatcher,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            rpc: RpcDispatcher::new(shared.clone()),
            notifications: NotificationDispatcher::new(shared.clone()),
            shared,
        }
    }

    /// Connect and pump until the transport dies, a restart is requested,
    /// or cancellation fires.
    pub(crate) async fn run(
        &self,
        connector: &dyn Connector,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
        let mut transport = connector.connect(address, inbound_tx).await?;
        info!(address = %address, "Connected to remote backend");

        let (outbound_tx, mut outbound) = mpsc::unbounded_channel::<OutboundBatch>();
        self.shared.outbound.set(Some(outbound_tx));
        self.shared.heartbeat.clear_pending();
        self.shared.in_rpc.set(false);
        let _ = self.shared.events.send(RigEvent::ConnectionChanged(true));

        // Login pair: the login frame always, the named status snapshot
        // only when the stored address can attribute the rig.
        let credentials = self.shared.credentials.get();
        let login =
            serde_json::to_string(&credentials.login_message()).context("serializing login")?;
        let mut batch = vec![OutboundCommand::Send(login)];
        if credentials.has_valid_btc() {
            batch.push(OutboundCommand::SendStatus(self.shared.build_status(true)));
        }
        self.shared.enqueue(batch);

        let end = self
            .pump(transport.as_mut(), &mut inbound, &mut outbound, cancel)
            .await;

        self.shared.outbound.set(None);
        let _ = self.shared.events.send(RigEvent::ConnectionChanged(false));
        info!(?end, "Session ended");
        Ok(end)
    }

    async fn pump(
        &self,
        transport: &mut dyn Transport,
        inbound: &mut mpsc::UnboundedReceiver<String>,
        outbound: &mut mpsc::UnboundedReceiver<OutboundBatch>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut restart = false;
        while transport.is_open() && !restart && !cancel.is_cancelled() {
            // One outbound batch per tick, drained whole.
            if let Ok(batch) = outbound.try_recv() {
                for command in batch {
                    match command {
                        OutboundCommand::Close(reason) => {
                            info!(reason = %reason, "Closing session");
                            transport.close(&reason).await;
                            restart = true;
                        }
                        OutboundCommand::Send(frame) => {
                            if let Err(e) = transport.send(&frame).await {
                                warn!(error = %e, "Send failed");
                            }
                        }
                        OutboundCommand::SendStatus(frame) => {
                            if transport.send(&frame).await.is_ok() {
                                self.shared.heartbeat.mark_sent(Instant::now());
                            }
                        }
                    }
                }
            }

            // One inbound frame per tick, only while the transport can
            // still carry the reply.
            if !restart && transport.is_open() {
                if let Ok(frame) = inbound.try_recv() {
                    self.handle_frame(transport, &frame).await;
                }
            }

            // No valid payment address means no attribution: login went
            // out, but heartbeats stay quiet.
            if self.shared.credentials.get().has_valid_btc()
                && self.shared.heartbeat.poll(Instant::now())
            {
                self.shared
                    .enqueue(vec![OutboundCommand::SendStatus(self.shared.build_status(false))]);
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(PUMP_TICK) => {}
            }
        }
        if cancel.is_cancelled() {
            SessionEnd::Cancelled
        } else if restart {
            SessionEnd::Restart
        } else {
            SessionEnd::Closed
        }
    }

    async fn handle_frame(&self, transport: &mut dyn Transport, frame: &str) {
        let Some(method) = method_of(frame) else {
            warn!("Frame without a method, dropping");
            return;
        };
        if RpcMethod::parse(&method).is_some() {
            self.handle_rpc(transport, &method, frame).await;
        } else {
            self.notifications.handle(&method, frame);
        }
    }

    async fn handle_rpc(&self, transport: &mut dyn Transport, method: &str, frame: &str) {
        debug!(method = %method, "Executing RPC");
        self.shared.in_rpc.set(true);
        let outcome = self.rpc.dispatch(method, frame).await;
        self.shared.in_rpc.set(false);

        // Exactly one status, then exactly one reply, in that order. Sent
        // directly rather than enqueued so nothing slips in between.
        let status = self.shared.build_status(false);
        if transport.send(&status).await.is_ok() {
            self.shared.heartbeat.mark_sent(Instant::now());
        }
        if let Err(e) = transport.send(&outcome.reply.to_json()).await {
            warn!(error = %e, "RPC reply not delivered");
        }

        // Credentials commit after the reply; the close triggers the
        // re-login on reconnect.
        if let Some(update) = outcome.credential_update {
            self.shared.apply_credentials(update);
        }
    }
}
