//! Test-only collaborators with recorded calls.
//!
//! All fakes keep their state behind a `std::sync::Mutex` so they can be
//! shared with a running service through `Arc` and inspected afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use tokio::time::Instant;

use ep_core::traits::{
    CredentialDecryptor, LogCollector, Scheduler, StackReconciler, TunnelClient, TunnelConfig,
};
use ep_core::{PollError, PollResponse, Schedule};

use crate::poll::StatusSource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Encode credentials the way [`PrefixDecryptor`] expects them for `key`.
pub fn encode_credentials(key: &str, plaintext: &str) -> String {
    STANDARD_NO_PAD.encode(format!("{}{}", key, plaintext))
}

/// Decryptor whose ciphertext is the key followed by the plaintext.
pub struct PrefixDecryptor;

impl CredentialDecryptor for PrefixDecryptor {
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> anyhow::Result<Vec<u8>> {
        match ciphertext.strip_prefix(key) {
            Some(plaintext) => Ok(plaintext.to_vec()),
            None => anyhow::bail!("message authentication failed"),
        }
    }
}

/// In-memory tunnel transport.
#[derive(Default)]
pub struct FakeTunnel {
    open: AtomicBool,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    close_calls: AtomicUsize,
    opened_with: Mutex<Vec<TunnelConfig>>,
}

impl FakeTunnel {
    /// A closed tunnel.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tunnel that is already open.
    pub fn opened() -> Self {
        let tunnel = Self::default();
        tunnel.set_open(true);
        tunnel
    }

    /// Force the open state.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make `open` fail.
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `close` fail and leave the tunnel open.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of close attempts, failed ones included.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Descriptors of successful opens.
    pub fn opened_with(&self) -> Vec<TunnelConfig> {
        lock(&self.opened_with).clone()
    }
}

#[async_trait]
impl TunnelClient for FakeTunnel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self, config: TunnelConfig) -> anyhow::Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            anyhow::bail!("tunnel server unreachable");
        }
        lock(&self.opened_with).push(config);
        self.set_open(true);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            anyhow::bail!("close refused");
        }
        self.set_open(false);
        Ok(())
    }
}

/// Scheduler recording every schedule list it receives.
#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<Vec<Schedule>>>,
    fail: AtomicBool,
}

impl RecordingScheduler {
    /// Make `apply` fail after recording the call.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Recorded schedule lists.
    pub fn calls(&self) -> Vec<Vec<Schedule>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn apply(&self, schedules: &[Schedule]) -> anyhow::Result<()> {
        lock(&self.calls).push(schedules.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("invalid cron expression");
        }
        Ok(())
    }
}

/// Log collector recording every id list it receives.
#[derive(Default)]
pub struct RecordingLogCollector {
    calls: Mutex<Vec<Vec<i64>>>,
}

impl RecordingLogCollector {
    /// Recorded id lists.
    pub fn calls(&self) -> Vec<Vec<i64>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl LogCollector for RecordingLogCollector {
    async fn request_collection(&self, job_ids: Vec<i64>) {
        lock(&self.calls).push(job_ids);
    }
}

/// Stack reconciler recording every target map it receives.
#[derive(Default)]
pub struct RecordingStackReconciler {
    calls: Mutex<Vec<HashMap<i64, i64>>>,
    fail: AtomicBool,
}

impl RecordingStackReconciler {
    /// Make `reconcile` fail after recording the call.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Recorded target maps.
    pub fn calls(&self) -> Vec<HashMap<i64, i64>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl StackReconciler for RecordingStackReconciler {
    async fn reconcile(&self, stacks: HashMap<i64, i64>) -> anyhow::Result<()> {
        lock(&self.calls).push(stacks);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("stack deployment failed");
        }
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<PollResponse, u16>>,
    fallback: PollResponse,
    fetches: Vec<(Instant, Duration)>,
    timeout: Duration,
}

/// Status source replaying scripted responses.
///
/// Clones share the same script, so a test keeps one clone to inspect fetch
/// times and timeouts after handing the other to the service.
#[derive(Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    /// A source whose timeout starts at `timeout` and which answers
    /// `fallback` once the queued responses run out.
    pub fn new(timeout: Duration, fallback: PollResponse) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                fallback,
                timeout,
                ..Script::default()
            })),
        }
    }

    /// Queue a successful response.
    pub fn push(&self, response: PollResponse) {
        lock(&self.script).responses.push_back(Ok(response));
    }

    /// Queue a non-200 answer.
    pub fn push_status(&self, status: u16) {
        lock(&self.script).responses.push_back(Err(status));
    }

    /// Fetch times, each paired with the timeout in force for that fetch.
    pub fn fetches(&self) -> Vec<(Instant, Duration)> {
        lock(&self.script).fetches.clone()
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch(&self) -> Result<PollResponse, PollError> {
        let mut script = lock(&self.script);
        let timeout = script.timeout;
        script.fetches.push((Instant::now(), timeout));
        match script.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(PollError::Status(status)),
            None => Ok(script.fallback.clone()),
        }
    }

    fn timeout(&self) -> Duration {
        lock(&self.script).timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PollError> {
        lock(&self.script).timeout = timeout;
        Ok(())
    }
}
