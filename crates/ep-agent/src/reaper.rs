//! Tunnel inactivity reaper
//!
//! Runs on its own fixed clock, independent of the poll cadence, and closes
//! the reverse tunnel once it has been idle for longer than the inactivity
//! timeout.
//!
//! # Ownership of the last activity timestamp
//!
//! The timestamp lives inside [`ActivityReaper`] and is only ever written by
//! the reaper task. Other components report activity through an
//! [`ActivitySignal`], which pushes a unit message into a single-slot channel.
//! A signal sent while the slot is full is dropped: the reaper re-evaluates
//! elapsed time on every check, so coalescing is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ep_core::traits::TunnelClient;
use ep_core::{CycleStep, TunnelError};

/// Interval between tunnel inactivity checks.
pub const TUNNEL_ACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const ACTIVITY_CHANNEL_CAPACITY: usize = 1;

/// Reports tunnel activity to the reaper
#[derive(Clone)]
pub struct ActivitySignal {
    tunnel: Option<Arc<dyn TunnelClient>>,
    tx: mpsc::Sender<()>,
}

impl ActivitySignal {
    /// Mark the tunnel as used now.
    ///
    /// Does nothing unless a tunnel transport exists and reports open, so a
    /// closed tunnel never gets a keep-alive.
    pub fn reset(&self) {
        let Some(tunnel) = &self.tunnel else {
            return;
        };
        if !tunnel.is_open() {
            return;
        }

        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                tracing::trace!("Activity signal coalesced");
            }
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Activity reaper is not running, signal dropped");
            }
        }
    }
}

/// Whether a tunnel last used at `last_activity` has been idle for `timeout`.
///
/// An unset timestamp never expires.
pub fn idle_expired(last_activity: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    match last_activity {
        Some(last) => now.saturating_duration_since(last) >= timeout,
        None => false,
    }
}

/// Background loop closing idle tunnels
pub struct ActivityReaper {
    tunnel: Option<Arc<dyn TunnelClient>>,
    inactivity_timeout: Duration,
    check_interval: Duration,
    last_activity: Option<Instant>,
    activity_rx: mpsc::Receiver<()>,
}

impl ActivityReaper {
    /// Create a reaper and the signal used to feed it
    pub fn new(
        tunnel: Option<Arc<dyn TunnelClient>>,
        inactivity_timeout: Duration,
    ) -> (Self, ActivitySignal) {
        let (tx, activity_rx) = mpsc::channel(ACTIVITY_CHANNEL_CAPACITY);
        let signal = ActivitySignal {
            tunnel: tunnel.clone(),
            tx,
        };
        let reaper = Self {
            tunnel,
            inactivity_timeout,
            check_interval: TUNNEL_ACTIVITY_CHECK_INTERVAL,
            last_activity: None,
            activity_rx,
        };
        (reaper, signal)
    }

    /// Override the check interval
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signals_open = true;

        tracing::debug!(
            monitoring_interval_seconds = self.check_interval.as_secs_f64(),
            inactivity_timeout = ?self.inactivity_timeout,
            "Starting activity monitoring loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                signal = self.activity_rx.recv(), if signals_open => {
                    match signal {
                        Some(()) => self.last_activity = Some(Instant::now()),
                        None => signals_open = false,
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Activity monitoring loop shutting down");
                    break;
                }
            }
        }
    }

    async fn check(&self) {
        let Some(last_activity) = self.last_activity else {
            return;
        };
        let Some(tunnel) = &self.tunnel else {
            return;
        };

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(last_activity);
        tracing::debug!(
            tunnel_last_activity_seconds = elapsed.as_secs_f64(),
            "Tunnel activity monitoring"
        );

        if tunnel.is_open() && idle_expired(self.last_activity, now, self.inactivity_timeout) {
            tracing::info!(
                tunnel_last_activity_seconds = elapsed.as_secs_f64(),
                "Shutting down tunnel after inactivity period"
            );
            let result = tunnel.close().await.map_err(TunnelError::Close);
            // Outside a poll cycle there is nothing to abort; the next check retries
            if let Err(e) = CycleStep::TunnelClose.handle(result) {
                tracing::error!(error = %e, "Unable to shutdown idle tunnel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTunnel;

    fn spawn_reaper(
        tunnel: &Arc<FakeTunnel>,
        timeout: Duration,
    ) -> (ActivitySignal, CancellationToken) {
        let client: Arc<dyn TunnelClient> = tunnel.clone();
        let (reaper, signal) = ActivityReaper::new(Some(client), timeout);
        let cancel = CancellationToken::new();
        tokio::spawn(reaper.run(cancel.clone()));
        (signal, cancel)
    }

    #[test]
    fn test_idle_expired() {
        let now = Instant::now();
        let timeout = Duration::from_secs(60);

        assert!(!idle_expired(None, now + Duration::from_secs(3600), timeout));
        assert!(!idle_expired(Some(now), now + Duration::from_secs(59), timeout));
        assert!(idle_expired(Some(now), now + Duration::from_secs(60), timeout));
        assert!(idle_expired(Some(now), now + Duration::from_secs(61), timeout));
    }

    #[test]
    fn test_check_interval_is_reasonable() {
        assert!(TUNNEL_ACTIVITY_CHECK_INTERVAL >= Duration::from_secs(5));
        assert!(TUNNEL_ACTIVITY_CHECK_INTERVAL <= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_closes_without_activity() {
        let tunnel = Arc::new(FakeTunnel::opened());
        let (_signal, cancel) = spawn_reaper(&tunnel, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(tunnel.close_calls(), 0);
        assert!(tunnel.is_open());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_on_first_check_after_timeout() {
        let tunnel = Arc::new(FakeTunnel::opened());
        let (signal, cancel) = spawn_reaper(&tunnel, Duration::from_secs(60));

        signal.reset();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(tunnel.close_calls(), 0);

        // Checks run at 30s and 60s
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tunnel.close_calls(), 1);
        assert!(!tunnel.is_open());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_close() {
        let tunnel = Arc::new(FakeTunnel::opened());
        let (signal, cancel) = spawn_reaper(&tunnel, Duration::from_secs(60));

        signal.reset();
        tokio::time::sleep(Duration::from_secs(45)).await;
        signal.reset();

        // 61s after the first signal, only 16s after the second
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(tunnel.close_calls(), 0);

        // Check at 120s sees 75s of idle time
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(tunnel.close_calls(), 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_ignored_while_closed() {
        let tunnel = Arc::new(FakeTunnel::new());
        let (signal, cancel) = spawn_reaper(&tunnel, Duration::from_secs(60));

        signal.reset();
        tunnel.set_open(true);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(tunnel.close_calls(), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_close_is_retried() {
        let tunnel = Arc::new(FakeTunnel::opened());
        tunnel.fail_close(true);
        let (signal, cancel) = spawn_reaper(&tunnel, Duration::from_secs(60));

        signal.reset();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(tunnel.close_calls(), 1);
        assert!(tunnel.is_open());

        tunnel.fail_close(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(tunnel.close_calls(), 2);
        assert!(!tunnel.is_open());
        cancel.cancel();
    }

    #[test]
    fn test_signal_without_transport_is_noop() {
        let (_reaper, signal) = ActivityReaper::new(None, Duration::from_secs(60));
        signal.reset();
    }
}
