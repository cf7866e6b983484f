//! Reconnect watchdog.
//!
//! Runs one session at a time forever: an explicit restart reconnects
//! immediately, everything else waits out a jittered backoff first.
//! Cancellation stops the loop mid-backoff or mid-session.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Shared;
use super::session::{Session, SessionEnd};
use super::transport::Connector;

const BACKOFF_MIN_SECS: u64 = 10;
const BACKOFF_SPREAD_SECS: u64 = 20;

/// Backoff sampled uniformly from [10, 30) seconds. Jitter comes from
/// hashing a step counter through a randomly seeded hasher, so no PRNG
/// dependency is needed and two rigs starting together still spread out.
struct ReconnectDelay {
    jitter: RandomState,
    step: u64,
}

impl ReconnectDelay {
    fn new() -> Self {
        Self {
            jitter: RandomState::new(),
            step: 0,
        }
    }

    fn next(&mut self) -> Duration {
        let mut hasher = self.jitter.build_hasher();
        hasher.write_u64(self.step);
        self.step = self.step.wrapping_add(1);
        Duration::from_secs(BACKOFF_MIN_SECS + hasher.finish() % BACKOFF_SPREAD_SECS)
    }
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    connector: &dyn Connector,
    address: &str,
    cancel: CancellationToken,
) {
    info!(address = %address, "Starting remote channel watchdog");
    let session = Session::new(shared);
    let mut delay = ReconnectDelay::new();
    while !cancel.is_cancelled() {
        match session.run(connector, address, &cancel).await {
            Ok(SessionEnd::Cancelled) => break,
            Ok(SessionEnd::Restart) => {
                info!("Session restart requested, reconnecting now");
                continue;
            }
            Ok(SessionEnd::Closed) => warn!("Connection lost"),
            Err(e) => warn!(error = %e, "Connection attempt failed"),
        }
        let pause = delay.next();
        info!(seconds = pause.as_secs(), "Reconnecting after backoff");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    info!("Ending remote channel watchdog");
}
