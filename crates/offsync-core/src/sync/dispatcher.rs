//! Rate-adaptive dispatcher draining the operation log against the remote store.
//!
//! One operation is in flight at a time. The inter-operation delay grows
//! multiplicatively on throttling and shrinks on success, always clamped to
//! the configured floor and ceiling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::storage::{DispatcherConfig, SyncStore};

use super::notify::{Notice, Notifier};
use super::operation_log::OperationLog;
use super::remote_store::RemoteStore;
use super::tombstones::TombstoneRegistry;
use super::types::{ErrorClass, Mutation, OpKind, Operation, RemoteError, SyncStats, SyncStatus};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multiplicative delay clamped to `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveDelay {
    current_ms: u64,
    min_ms: u64,
    max_ms: u64,
    throttle_factor: f64,
    relief_factor: f64,
}

impl AdaptiveDelay {
    pub fn new(config: &DispatcherConfig) -> Self {
        let min_ms = config.min_delay_ms.max(1);
        let max_ms = config.max_delay_ms.max(min_ms);
        Self {
            current_ms: config.initial_delay_ms.clamp(min_ms, max_ms),
            min_ms,
            max_ms,
            throttle_factor: config.throttle_factor.max(1.0),
            relief_factor: config.relief_factor.clamp(0.0, 1.0),
        }
    }

    /// Grow after a throttling response. Strictly increases unless at the ceiling.
    pub fn throttle(&mut self) -> u64 {
        let grown = (self.current_ms as f64 * self.throttle_factor).ceil() as u64;
        self.current_ms = grown.max(self.current_ms + 1).min(self.max_ms);
        self.current_ms
    }

    /// Shrink after a success. Strictly decreases unless at the floor.
    pub fn relieve(&mut self) -> u64 {
        let shrunk = (self.current_ms as f64 * self.relief_factor).floor() as u64;
        self.current_ms = shrunk
            .min(self.current_ms.saturating_sub(1))
            .max(self.min_ms);
        self.current_ms
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }
}

/// Why a `process()` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The log is empty.
    Drained,
    /// Another drain was already running; nothing was done.
    AlreadyRunning,
    /// Connectivity is known to be down.
    Offline,
    /// A network-class failure stopped the loop; the head stays pending.
    StoppedOnNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub succeeded: u32,
    pub dropped: u32,
    pub requeued: u32,
}

impl DrainReport {
    fn new(outcome: DrainOutcome) -> Self {
        Self {
            outcome,
            succeeded: 0,
            dropped: 0,
            requeued: 0,
        }
    }
}

struct DispatchState {
    delay: AdaptiveDelay,
    stats: SyncStats,
}

/// Resets the in-progress flag when the drain ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Step {
    Continue,
    Stop(DrainOutcome),
}

pub struct Dispatcher {
    log: Arc<Mutex<OperationLog>>,
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn SyncStore>,
    notifier: Arc<dyn Notifier>,
    tombstones: Option<Arc<Mutex<TombstoneRegistry>>>,
    config: DispatcherConfig,
    state: Mutex<DispatchState>,
    running: AtomicBool,
    online: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        log: Arc<Mutex<OperationLog>>,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn SyncStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatcherConfig,
    ) -> Self {
        let stats = store.load_stats().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not load sync stats, starting fresh");
            None
        });
        let delay = AdaptiveDelay::new(&config);
        let mut stats = stats.unwrap_or_default();
        stats.current_rate_limit_ms = delay.current_ms();

        Self {
            log,
            remote,
            store,
            notifier,
            tombstones: None,
            config,
            state: Mutex::new(DispatchState { delay, stats }),
            running: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    /// Confirmed remote deletes are also recorded here.
    pub fn with_tombstones(mut self, tombstones: Arc<Mutex<TombstoneRegistry>>) -> Self {
        self.tombstones = Some(tombstones);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SyncStats {
        lock(&self.state).stats.clone()
    }

    pub fn current_delay(&self) -> Duration {
        lock(&self.state).delay.current()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            pending_count: lock(&self.log).len(),
            in_progress: self.is_running(),
            stats: self.stats(),
        }
    }

    /// Drain the log until it is empty or a terminal condition is hit.
    ///
    /// Safe to call after every enqueue: a call made while a drain is already
    /// running returns [`DrainOutcome::AlreadyRunning`] immediately.
    pub async fn process(&self) -> DrainReport {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::trace!("drain already in progress");
            return DrainReport::new(DrainOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        if !self.is_online() {
            return DrainReport::new(DrainOutcome::Offline);
        }

        let mut report = DrainReport::new(DrainOutcome::Drained);
        let mut consecutive_successes: u32 = 0;
        let mut throttle_attempts: u32 = 0;
        let mut throttled_seq: Option<u64> = None;

        loop {
            let Some(op) = lock(&self.log).front().cloned() else {
                break;
            };
            if throttled_seq != Some(op.seq()) {
                throttle_attempts = 0;
                throttled_seq = None;
            }

            let started = Instant::now();
            let result = self.execute(&op).await;
            let step = match result {
                Ok(()) => {
                    self.on_success(&op, started);
                    report.succeeded += 1;
                    consecutive_successes += 1;
                    Step::Continue
                }
                Err(err) => {
                    consecutive_successes = 0;
                    match err.class() {
                        ErrorClass::Throttled => {
                            throttle_attempts += 1;
                            throttled_seq = Some(op.seq());
                            if self.on_throttled(&op, throttle_attempts) {
                                report.dropped += 1;
                            }
                            Step::Continue
                        }
                        ErrorClass::ConflictAsSuccess => {
                            // Not verified against local intent; see DESIGN.md.
                            tracing::debug!(op_id = %op.id, op_type = %op.op_type(), error = %err, "remote row already exists, dropping");
                            lock(&self.log).complete(op.seq());
                            report.succeeded += 1;
                            Step::Continue
                        }
                        ErrorClass::Permanent => {
                            self.drop_failed(&op, &err, true);
                            report.dropped += 1;
                            Step::Continue
                        }
                        ErrorClass::Network => {
                            tracing::info!(op_id = %op.id, error = %err, "network unavailable, pausing drain");
                            Step::Stop(DrainOutcome::StoppedOnNetwork)
                        }
                        ErrorClass::Transient => {
                            if self.on_transient(&op, &err).await {
                                report.dropped += 1;
                            } else {
                                report.requeued += 1;
                            }
                            Step::Continue
                        }
                    }
                }
            };
            self.save_stats();

            if let Step::Stop(outcome) = step {
                report.outcome = outcome;
                break;
            }
            if lock(&self.log).is_empty() {
                break;
            }

            let pause = self.pause_after(consecutive_successes);
            tokio::time::sleep(pause).await;
        }

        tracing::debug!(
            succeeded = report.succeeded,
            dropped = report.dropped,
            requeued = report.requeued,
            outcome = ?report.outcome,
            "drain finished"
        );
        report
    }

    async fn execute(&self, op: &Operation) -> Result<(), RemoteError> {
        match &op.mutation {
            Mutation::Upsert(payload) => self.remote.upsert(payload).await,
            Mutation::Delete(class) => self.remote.delete(*class, &op.id).await,
        }
    }

    fn on_success(&self, op: &Operation, started: Instant) {
        // A superseded delete (e.g. restored while in flight) must not tombstone.
        let completed = lock(&self.log).complete(op.seq());

        if completed && op.kind() == OpKind::Delete {
            if let Some(tombstones) = &self.tombstones {
                if let Err(e) = lock(tombstones).add([op.id.as_str()]) {
                    tracing::warn!(op_id = %op.id, error = %e, "failed to persist tombstone");
                }
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut state = lock(&self.state);
        let delay_ms = state.delay.relieve();
        state.stats.record_success(elapsed_ms, Utc::now());
        state.stats.current_rate_limit_ms = delay_ms;
        tracing::trace!(op_id = %op.id, op_type = %op.op_type(), delay_ms, "operation synced");
    }

    /// Returns `true` when the operation was dropped.
    fn on_throttled(&self, op: &Operation, attempts: u32) -> bool {
        let delay_ms = {
            let mut state = lock(&self.state);
            let delay_ms = state.delay.throttle();
            state.stats.record_throttle(Utc::now());
            state.stats.current_rate_limit_ms = delay_ms;
            delay_ms
        };

        if attempts > self.config.max_rate_limit_retries {
            tracing::warn!(op_id = %op.id, retries = attempts, "rate limit retries exhausted, dropping");
            lock(&self.log).complete(op.seq());
            lock(&self.state).stats.record_failure();
            return true;
        }
        tracing::info!(op_id = %op.id, retries = attempts, delay_ms, "rate limited, retrying in place");
        false
    }

    /// Returns `true` when the operation was dropped.
    async fn on_transient(&self, op: &Operation, err: &RemoteError) -> bool {
        let retries = lock(&self.log).requeue_tail(op.seq());
        let Some(retries) = retries else {
            // Superseded while in flight; the replacement is already queued.
            return false;
        };

        if retries > self.config.max_retries {
            self.drop_failed(op, err, false);
            return true;
        }

        let backoff = self.config.backoff(retries);
        tracing::info!(
            op_id = %op.id,
            retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "transient failure, requeued"
        );
        tokio::time::sleep(backoff).await;
        false
    }

    fn drop_failed(&self, op: &Operation, err: &RemoteError, notify: bool) {
        lock(&self.log).complete(op.seq());
        lock(&self.state).stats.record_failure();
        tracing::warn!(op_id = %op.id, op_type = %op.op_type(), retries = op.retry_count, error = %err, "dropping operation");
        if notify {
            self.notifier.notify(Notice::OperationDropped {
                op_type: op.op_type(),
                id: op.id.clone(),
                reason: err.to_string(),
            });
        }
    }

    fn pause_after(&self, consecutive_successes: u32) -> Duration {
        let delay = lock(&self.state).delay.current();
        let batch = self.config.batch_size.max(1);
        if consecutive_successes > 0 && consecutive_successes % batch == 0 {
            tracing::trace!(consecutive_successes, "batch pause");
            delay * self.config.batch_pause_multiplier
        } else {
            delay
        }
    }

    fn save_stats(&self) {
        let stats = self.stats();
        if let Err(e) = self.store.save_stats(&stats) {
            tracing::warn!(error = %e, "failed to persist sync stats");
        }
    }

    /// Follow connectivity changes, draining whenever the link comes back.
    pub fn watch_connectivity(self: &Arc<Self>, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut was_online = this.is_online();
            loop {
                let now_online = *online.borrow_and_update();
                this.set_online(now_online);
                if now_online && !was_online {
                    tracing::info!("connectivity restored, resuming sync");
                    this.process().await;
                }
                was_online = now_online;

                if online.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
