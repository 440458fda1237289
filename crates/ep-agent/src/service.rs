//! Poll service
//!
//! Owns the two background loops of the agent:
//!
//! - the **poll loop**, which ticks at the controller-adjustable cadence and
//!   runs one poll cycle per tick (fetch status, react with the tunnel,
//!   dispatch the response);
//! - the **activity reaper** (see [`crate::reaper`]), which closes an idle
//!   tunnel on its own fixed clock.
//!
//! The poll loop is a single `select!` over tick, start and stop, so cycles
//! never overlap and a tick arriving during a cycle waits for it to finish.
//! The cadence and the HTTP client are owned by the poll task alone; a new
//! cadence is applied by recreating the ticker, so it only affects the next
//! tick. `stop` disarms the ticker without cancelling an in-flight request
//! and leaves the reaper running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ep_core::config::AgentConfig;
use ep_core::traits::{CredentialDecryptor, LogCollector, Scheduler, StackReconciler, TunnelClient};
use ep_core::{CycleStep, EdgeError, PollError};

use crate::dispatch::{CadenceControl, ResponseDispatcher};
use crate::poll::{PollClient, StatusSource};
use crate::reaper::{ActivityReaper, ActivitySignal};
use crate::tunnel::{TunnelIdentity, TunnelLifecycle};

const CONTROL_CHANNEL_CAPACITY: usize = 1;

/// Reverse tunnel transport and the primitive used to unwrap its credentials
#[derive(Clone)]
pub struct TunnelTransport {
    /// Tunnel transport
    pub client: Arc<dyn TunnelClient>,
    /// Credential decryption primitive
    pub decryptor: Arc<dyn CredentialDecryptor>,
}

/// External subsystems driven by the poll service
#[derive(Clone)]
pub struct Collaborators {
    /// Job scheduling engine
    pub scheduler: Arc<dyn Scheduler>,
    /// Log collection engine
    pub log_collector: Arc<dyn LogCollector>,
    /// Stack reconciliation engine
    pub stack_reconciler: Arc<dyn StackReconciler>,
    /// Tunnel transport; `None` runs the agent without tunnel management
    pub tunnel: Option<TunnelTransport>,
}

/// Cheap handle used to control a running poll service
#[derive(Clone)]
pub struct PollServiceHandle {
    start_tx: mpsc::Sender<()>,
    stop_tx: mpsc::Sender<()>,
    activity: ActivitySignal,
    cancel: CancellationToken,
}

impl PollServiceHandle {
    /// Arm the poll ticker
    pub async fn start(&self) {
        if self.start_tx.send(()).await.is_err() {
            tracing::debug!("Poll loop is not running, start ignored");
        }
    }

    /// Disarm the poll ticker
    pub async fn stop(&self) {
        if self.stop_tx.send(()).await.is_err() {
            tracing::debug!("Poll loop is not running, stop ignored");
        }
    }

    /// Record tunnel activity; ignored unless a tunnel is open
    pub fn reset_activity_timer(&self) {
        self.activity.reset();
    }

    /// Stop both loops
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Running poll service
pub struct PollService {
    handle: PollServiceHandle,
    poll_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
}

impl PollService {
    /// Validate `config`, build the HTTP poll client and start both loops.
    ///
    /// Polling stays disarmed until [`PollServiceHandle::start`] is called.
    pub fn spawn(config: &AgentConfig, collaborators: Collaborators) -> Result<Self, EdgeError> {
        config.validate()?;
        let source = PollClient::new(config)?;
        tracing::debug!(
            poll_interval_seconds = config.poll_frequency.as_secs_f64(),
            server_url = config.controller_url(),
            "Starting short-polling client"
        );
        Self::spawn_with_source(config, source, collaborators)
    }

    /// Start both loops over an arbitrary status source.
    ///
    /// The cadence starts at `config.poll_frequency`. Only that interval is
    /// checked here; the rest of `config` is not validated.
    pub fn spawn_with_source<S>(
        config: &AgentConfig,
        source: S,
        collaborators: Collaborators,
    ) -> Result<Self, EdgeError>
    where
        S: StatusSource + 'static,
    {
        let cadence = Cadence::new(source, config.poll_frequency.as_secs_f64())?;
        let cancel = CancellationToken::new();
        let tunnel_client = collaborators
            .tunnel
            .as_ref()
            .map(|transport| transport.client.clone());

        let (reaper, activity) = ActivityReaper::new(tunnel_client, config.inactivity_timeout);

        let lifecycle = collaborators.tunnel.map(|transport| {
            TunnelLifecycle::new(
                transport.client,
                transport.decryptor,
                TunnelIdentity::from_config(config),
                activity.clone(),
            )
        });

        let dispatcher = ResponseDispatcher::new(
            collaborators.scheduler,
            collaborators.log_collector,
            collaborators.stack_reconciler,
        );

        let (start_tx, start_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let poll_loop = PollLoop {
            cadence,
            lifecycle,
            dispatcher,
            armed: false,
            start_rx,
            stop_rx,
        };

        let poll_task = tokio::spawn(poll_loop.run(cancel.clone()));
        let reaper_task = tokio::spawn(reaper.run(cancel.clone()));

        Ok(Self {
            handle: PollServiceHandle {
                start_tx,
                stop_tx,
                activity,
                cancel,
            },
            poll_task,
            reaper_task,
        })
    }

    /// Get a control handle
    pub fn handle(&self) -> PollServiceHandle {
        self.handle.clone()
    }

    /// Stop both loops and wait for them to exit
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.poll_task.await {
            tracing::warn!("Poll loop ended abnormally: {}", e);
        }
        if let Err(e) = self.reaper_task.await {
            tracing::warn!("Activity reaper ended abnormally: {}", e);
        }
    }
}

/// Poll cadence: the ticker and the HTTP client whose timeout tracks it
struct Cadence<S> {
    source: S,
    interval_secs: f64,
    ticker: Interval,
}

impl<S: StatusSource> Cadence<S> {
    fn new(source: S, interval_secs: f64) -> Result<Self, PollError> {
        Ok(Self {
            source,
            ticker: ticker(interval_secs)?,
            interval_secs,
        })
    }
}

impl<S: StatusSource> CadenceControl for Cadence<S> {
    fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    fn adopt(&mut self, interval_secs: f64) -> Result<(), PollError> {
        let ticker = ticker(interval_secs)?;
        self.source
            .set_timeout(Duration::from_secs_f64(interval_secs))?;
        self.interval_secs = interval_secs;
        self.ticker = ticker;
        Ok(())
    }
}

/// First tick one period from now, like a plain ticker.
///
/// Fails for periods that are zero, unrepresentable, or put the first tick
/// past the end of the clock.
fn ticker(interval_secs: f64) -> Result<Interval, PollError> {
    let invalid = || PollError::InvalidInterval(interval_secs);
    let period = Duration::try_from_secs_f64(interval_secs).map_err(|_| invalid())?;
    if period.is_zero() {
        return Err(invalid());
    }
    let start = Instant::now().checked_add(period).ok_or_else(invalid)?;

    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Ok(ticker)
}

struct PollLoop<S> {
    cadence: Cadence<S>,
    lifecycle: Option<TunnelLifecycle>,
    dispatcher: ResponseDispatcher,
    armed: bool,
    start_rx: mpsc::Receiver<()>,
    stop_rx: mpsc::Receiver<()>,
}

impl<S: StatusSource> PollLoop<S> {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.cadence.ticker.tick(), if self.armed => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "An error occurred during short poll");
                    }
                }
                Some(()) = self.start_rx.recv() => {
                    self.armed = true;
                }
                Some(()) = self.stop_rx.recv() => {
                    tracing::debug!("Stopping short-polling client");
                    self.armed = false;
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Poll loop shutting down");
                    break;
                }
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<(), EdgeError> {
        let fetched = self.cadence.source.fetch().await;
        let Some(response) = CycleStep::Fetch.handle(fetched)? else {
            return Ok(());
        };

        tracing::debug!(
            status = %response.status,
            port = response.port,
            schedule_count = response.schedules.len(),
            checkin_interval_seconds = response.checkin_interval,
            "Poll response received"
        );

        if let Some(lifecycle) = &self.lifecycle {
            lifecycle
                .react(&response.status, &response.credentials, response.port)
                .await?;
        }

        self.dispatcher
            .dispatch(&response, &mut self.cadence)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSource;
    use ep_core::PollResponse;

    fn source() -> ScriptedSource {
        ScriptedSource::new(Duration::from_secs(10), PollResponse::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_rejects_unusable_periods() {
        assert!(ticker(10.0).is_ok());
        assert!(matches!(ticker(0.0), Err(PollError::InvalidInterval(_))));
        assert!(matches!(ticker(-3.0), Err(PollError::InvalidInterval(_))));
        assert!(matches!(ticker(f64::NAN), Err(PollError::InvalidInterval(_))));
        assert!(matches!(ticker(1e19), Err(PollError::InvalidInterval(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_keeps_state_when_interval_overflows() {
        let source = source();
        let mut cadence = Cadence::new(source.clone(), 10.0).unwrap();

        let err = cadence.adopt(1e19).unwrap_err();

        assert!(matches!(err, PollError::InvalidInterval(_)));
        assert_eq!(cadence.interval_secs(), 10.0);
        assert_eq!(source.timeout(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_adopts_new_interval() {
        let source = source();
        let mut cadence = Cadence::new(source.clone(), 10.0).unwrap();

        cadence.adopt(30.0).unwrap();

        assert_eq!(cadence.interval_secs(), 30.0);
        assert_eq!(source.timeout(), Duration::from_secs(30));
    }
}
