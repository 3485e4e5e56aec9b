//! Watching for the client to go away while a transfer is running.
//!
//! axum gives no "peer closed" callback. What it does do is drop the handler future when the
//! connection dies, so the handler holds the [`DropGuard`] of a [`ClientConnection`] and the
//! spawned orchestration polls it. Polling adds up to one interval of latency to a
//! disconnect; a push-style signal from the transport would remove that if one becomes
//! available.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Liveness of the inbound request, as seen from outside the handler.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    token: CancellationToken,
}

impl ClientConnection {
    /// A fresh connection and the guard that marks it closed when dropped.
    ///
    /// Keep the guard inside the request handler future; disarm it once a response is ready.
    pub fn new() -> (Self, DropGuard) {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        (Self { token }, guard)
    }

    pub fn is_disconnected(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The probe reported a disconnect and the callback was run
    Disconnected,
    /// The watched work finished first
    Settled,
}

#[derive(Debug, Clone, Copy)]
pub struct CancellationMonitor {
    interval: Duration,
}

impl CancellationMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `probe` every interval until it returns `true` or `settled` is cancelled.
    ///
    /// On the first `true`, `on_disconnect` runs exactly once and polling stops. Cancelling
    /// `settled` ends the watch at once, without waiting for the next tick.
    pub async fn watch<P, F>(&self, probe: P, settled: CancellationToken, on_disconnect: F) -> WatchOutcome
    where
        P: Fn() -> bool,
        F: FnOnce(),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut on_disconnect = Some(on_disconnect);

        loop {
            tokio::select! {
                biased;
                _ = settled.cancelled() => return WatchOutcome::Settled,
                _ = ticker.tick() => {
                    if probe() {
                        tracing::info!("Client disconnected, cancelling transfer");
                        if let Some(callback) = on_disconnect.take() {
                            callback();
                        }
                        return WatchOutcome::Disconnected;
                    }
                }
            }
        }
    }
}
