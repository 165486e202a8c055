//! Bounded-concurrency dispatcher with per-class partitioning.
//!
//! The queue is ordered by `(enqueued_at, priority desc, submission order)`.
//! A drain pass walks it front to back:
//!
//! 1. stop the whole pass if dispatch is paused (operator pause or a
//!    critical provider open);
//! 2. stop if every slot is taken;
//! 3. skip the job, leaving it in place, if its class is at its cap or one
//!    of its providers is open;
//! 4. otherwise reserve a slot, mark the job RUNNING in the store and hand
//!    it to the executor on its own task.
//!
//! Drains never overlap. A drain requested while one is running sets
//! `drain_requested`; the active drain loops once more instead of a second
//! pass starting with a stale view of the slot counts.
//!
//! Running counts change in exactly two places: `State::start` and
//! `State::finish`. Whichever of settle, reap or a failed dispatch removes
//! a job from `in_flight` first releases its slot; later callers find
//! nothing to release.

use chrono::{DateTime, Utc};
use fh_config::SchedulerSection;
use fh_core::{
    BreakerTransition, Clock, Job, JobClass, JobStatus, NewJob, Outcome, RunnerResult,
    SystemHealth, TaskError, TransitionListener,
};
use fh_executor::{JobContext, ProgressReporter, TaskExecutor};
use fh_store::{JobFilter, JobStore, StatusChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::classifier::classify;
use crate::guard::{CompletionGuard, Terminal};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs running at once across all classes.
    pub total_slots: usize,
    pub max_concurrency: BTreeMap<JobClass, usize>,
    /// Wall-clock budget per job; exceeding it settles as a timeout.
    pub budgets: BTreeMap<JobClass, Duration>,
    pub drain_interval: Duration,
}

impl SchedulerConfig {
    pub fn from_section(section: &SchedulerSection) -> Self {
        Self {
            total_slots: section.total_slots,
            max_concurrency: JobClass::ALL
                .into_iter()
                .map(|c| (c, section.max_concurrency(c)))
                .collect(),
            budgets: JobClass::ALL
                .into_iter()
                .map(|c| (c, section.budget(c)))
                .collect(),
            drain_interval: section.drain_interval(),
        }
    }

    pub fn cap(&self, class: JobClass) -> usize {
        self.max_concurrency
            .get(&class)
            .copied()
            .unwrap_or(self.total_slots)
            .min(self.total_slots)
    }

    pub fn budget(&self, class: JobClass) -> Duration {
        self.budgets
            .get(&class)
            .copied()
            .unwrap_or(Duration::from_secs(300))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_section(&SchedulerSection::default())
    }
}

/// Result of [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "status")]
pub enum CancelOutcome {
    /// Was queued; removed and written CANCELLED.
    Dequeued,
    /// Is running here; its cancellation token fired.
    Signalled,
    /// Nothing to cancel in this process.
    NotCancellable(JobStatus),
}

/// Read-only view of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queued: Vec<QueuedJobView>,
    pub running: BTreeMap<JobClass, usize>,
    pub running_total: usize,
    pub total_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJobView {
    pub id: String,
    pub class: JobClass,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct QueuedJob {
    job: Job,
    seq: u64,
}

impl QueuedJob {
    fn sort_key(&self) -> (DateTime<Utc>, std::cmp::Reverse<i32>, u64) {
        (
            self.job.enqueued_at,
            std::cmp::Reverse(self.job.priority),
            self.seq,
        )
    }
}

/// Ordered queued jobs plus the running count per class.
#[derive(Debug, Default)]
struct QueueState {
    queued: Vec<QueuedJob>,
    running: BTreeMap<JobClass, usize>,
}

impl QueueState {
    fn insert(&mut self, entry: QueuedJob) {
        let key = entry.sort_key();
        let at = self.queued.partition_point(|q| q.sort_key() <= key);
        self.queued.insert(at, entry);
    }

    fn remove(&mut self, id: &str) -> Option<QueuedJob> {
        let at = self.queued.iter().position(|q| q.job.id == id)?;
        Some(self.queued.remove(at))
    }

    fn contains(&self, id: &str) -> bool {
        self.queued.iter().any(|q| q.job.id == id)
    }

    fn running(&self, class: JobClass) -> usize {
        self.running.get(&class).copied().unwrap_or(0)
    }

    fn running_total(&self) -> usize {
        self.running.values().sum()
    }
}

#[derive(Debug)]
struct InFlight {
    class: JobClass,
    providers: Vec<String>,
    cancel: CancellationToken,
    /// HALF_OPEN providers this job is probing.
    probes: Vec<String>,
}

#[derive(Debug)]
struct State {
    queue: QueueState,
    breaker: CircuitBreaker,
    in_flight: HashMap<String, InFlight>,
    is_draining: bool,
    drain_requested: bool,
    next_seq: u64,
}

impl State {
    fn enqueue(&mut self, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(QueuedJob { job, seq });
    }

    fn start(&mut self, id: &str, flight: InFlight) {
        *self.queue.running.entry(flight.class).or_insert(0) += 1;
        self.in_flight.insert(id.to_string(), flight);
    }

    fn finish(&mut self, id: &str) -> Option<InFlight> {
        let flight = self.in_flight.remove(id)?;
        if let Some(count) = self.queue.running.get_mut(&flight.class) {
            *count = count.saturating_sub(1);
        }
        for provider in &flight.probes {
            self.breaker.release_probe(provider);
        }
        Some(flight)
    }
}

/// A slot reserved under the lock, not yet marked RUNNING in the store.
struct Reservation {
    entry: QueuedJob,
    cancel: CancellationToken,
}

struct Inner {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    guard: CompletionGuard,
    listeners: Vec<Arc<dyn TransitionListener>>,
    state: Mutex<State>,
    drain_signal: Notify,
}

/// Process-wide scheduling authority. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        breaker: BreakerConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = CompletionGuard::new(store.clone(), clock.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                executor,
                clock,
                guard,
                listeners: Vec::new(),
                state: Mutex::new(State {
                    queue: QueueState::default(),
                    breaker: CircuitBreaker::new(breaker),
                    in_flight: HashMap::new(),
                    is_draining: false,
                    drain_requested: false,
                    next_seq: 0,
                }),
                drain_signal: Notify::new(),
            }),
        }
    }

    /// Register a breaker transition listener. Only valid before the
    /// scheduler is cloned.
    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.listeners.push(listener),
            None => warn!("scheduler already shared; transition listener ignored"),
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn guard(&self) -> &CompletionGuard {
        &self.inner.guard
    }

    /// Persist a new QUEUED job and append it to the queue. Dispatch happens
    /// on the next drain, never inside this call.
    pub async fn submit(&self, request: NewJob) -> RunnerResult<Job> {
        let job = request.into_job(self.inner.clock.now());
        self.inner.store.insert(job.clone()).await?;
        info!(job = %job.id, class = %job.class, providers = ?job.providers, "job queued");
        self.lock().enqueue(job.clone());
        self.request_drain();
        Ok(job)
    }

    /// Load QUEUED jobs left in the store by a previous process.
    ///
    /// RUNNING leftovers are not resumed; the reaper fails them once their
    /// heartbeat is stale.
    pub async fn recover(&self) -> RunnerResult<usize> {
        let queued = self
            .inner
            .store
            .list(&JobFilter::status(JobStatus::Queued))
            .await?;
        let mut state = self.lock();
        let mut recovered = 0;
        for job in queued {
            if state.queue.contains(&job.id) || state.in_flight.contains_key(&job.id) {
                continue;
            }
            state.enqueue(job);
            recovered += 1;
        }
        drop(state);
        if recovered > 0 {
            info!(recovered, "recovered queued jobs from store");
            self.request_drain();
        }
        Ok(recovered)
    }

    /// Ask the driver for a drain pass. Never blocks.
    pub fn request_drain(&self) {
        self.inner.drain_signal.notify_one();
    }

    /// Run admission control. Returns how many jobs this call dispatched;
    /// 0 when another drain was already running (it will loop again).
    pub async fn drain(&self) -> usize {
        {
            let mut state = self.lock();
            if state.is_draining {
                state.drain_requested = true;
                return 0;
            }
            state.is_draining = true;
        }

        let mut dispatched = 0;
        loop {
            dispatched += self.drain_once().await;
            let mut state = self.lock();
            if state.drain_requested {
                state.drain_requested = false;
                continue;
            }
            state.is_draining = false;
            break;
        }
        self.flush_transitions();
        dispatched
    }

    async fn drain_once(&self) -> usize {
        let reservations = self.reserve();
        let mut dispatched = 0;
        for reservation in reservations {
            if self.dispatch(reservation).await {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Pick jobs to start and reserve their slots. Synchronous: the whole
    /// admission decision is made under one lock acquisition.
    fn reserve(&self) -> Vec<Reservation> {
        let now = self.inner.clock.now();
        let config = &self.inner.config;
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut picked = Vec::new();

        let mut index = 0;
        while index < state.queue.queued.len() {
            if state.breaker.is_paused(now) {
                debug!(queued = state.queue.queued.len() - index, "dispatch paused");
                break;
            }
            if state.queue.running_total() >= config.total_slots {
                break;
            }

            let entry = &state.queue.queued[index];
            let class = entry.job.class;
            if state.queue.running(class) >= config.cap(class) {
                index += 1;
                continue;
            }
            let providers = entry.job.providers.clone();
            if !state.breaker.admits(&providers, now) {
                debug!(job = %entry.job.id, "provider open, job held");
                index += 1;
                continue;
            }

            let entry = state.queue.queued.remove(index);
            let probes = state.breaker.mark_dispatched(&providers);
            let cancel = CancellationToken::new();
            state.start(
                &entry.job.id,
                InFlight {
                    class,
                    providers,
                    cancel: cancel.clone(),
                    probes,
                },
            );
            picked.push(Reservation { entry, cancel });
        }
        picked
    }

    /// Mark a reserved job RUNNING and spawn it. Undoes the reservation if
    /// the store refuses.
    async fn dispatch(&self, reservation: Reservation) -> bool {
        let Reservation { entry, cancel } = reservation;
        let id = entry.job.id.clone();
        let now = self.inner.clock.now();
        let result = self
            .inner
            .store
            .compare_and_set_status(
                &id,
                JobStatus::Queued,
                StatusChange::new(JobStatus::Running, now),
            )
            .await;

        match result {
            Ok(true) => {}
            Ok(false) => {
                // Finished or cancelled elsewhere (e.g. another CLI); drop it.
                debug!(job = %id, "job left QUEUED before dispatch");
                self.lock().finish(&id);
                return false;
            }
            Err(e) => {
                warn!(job = %id, error = %e, "failed to mark job running; keeping it queued");
                let mut state = self.lock();
                state.finish(&id);
                state.queue.insert(entry);
                return false;
            }
        }

        let mut job = entry.job;
        job.status = JobStatus::Running;
        job.updated_at = now;
        let budget = self.inner.config.budget(job.class);
        info!(job = %id, class = %job.class, budget_secs = budget.as_secs(), "job dispatched");

        let ctx = JobContext {
            progress: ProgressReporter::new(
                &id,
                self.inner.store.clone(),
                self.inner.clock.clone(),
            ),
            job,
            cancel: cancel.clone(),
        };
        let executor = self.inner.executor.clone();
        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(budget, executor.run(ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    cancel.cancel();
                    Outcome::Failed(TaskError::Timeout {
                        provider: None,
                        elapsed: budget,
                    })
                }
            };
            scheduler.on_job_settled(&id, outcome).await;
        });
        true
    }

    /// Executor completion callback: classify, feed the breaker, release
    /// the slot, write the terminal status, then ask for another drain.
    pub async fn on_job_settled(&self, id: &str, outcome: Outcome) {
        let now = self.inner.clock.now();
        let classification = match &outcome {
            Outcome::Failed(err) => Some(classify(err)),
            _ => None,
        };

        let tracked = {
            let mut state = self.lock();
            let flight = state
                .in_flight
                .get(id)
                .map(|f| (f.providers.clone(), f.probes.clone()));
            if let Some((providers, probes)) = &flight {
                let probing = |provider: &str| probes.iter().any(|p| p == provider);
                match (&outcome, &classification) {
                    (Outcome::Succeeded, _) => {
                        for provider in providers {
                            state
                                .breaker
                                .record_result(provider, None, probing(provider), now);
                        }
                    }
                    (Outcome::Failed(err), Some(c)) => match err.provider() {
                        Some(provider) => {
                            state
                                .breaker
                                .record_result(provider, Some(c), probing(provider), now)
                        }
                        None => {
                            for provider in providers {
                                state
                                    .breaker
                                    .record_result(provider, Some(c), probing(provider), now);
                            }
                        }
                    },
                    _ => {}
                }
            }
            state.finish(id);
            flight.is_some()
        };
        if !tracked {
            debug!(job = %id, "settled job no longer tracked (reaped)");
        }

        let terminal = match (&outcome, classification) {
            (Outcome::Succeeded, _) => Terminal::succeeded(),
            (Outcome::Failed(err), Some(c)) => {
                Terminal::failed(err.to_string()).with_category(c.category)
            }
            (Outcome::Failed(err), None) => Terminal::failed(err.to_string()),
            (Outcome::Cancelled, _) => Terminal::cancelled("cancelled"),
        };
        let status = terminal.status;
        match self
            .inner
            .guard
            .try_set_terminal(id, JobStatus::Running, terminal)
            .await
        {
            Ok(true) => match (&outcome, classification) {
                (Outcome::Failed(err), Some(c)) => info!(
                    job = %id,
                    category = %c.category,
                    retryable = c.retryable,
                    error = %err,
                    "job failed"
                ),
                _ => info!(job = %id, %status, "job settled"),
            },
            Ok(false) => {}
            Err(e) => warn!(job = %id, error = %e, "failed to record job outcome"),
        }

        self.flush_transitions();
        self.request_drain();
    }

    /// Reaper callback after it failed a stale job. Releases the slot
    /// without charging any provider.
    pub fn on_job_reaped(&self, id: &str) {
        if let Some(flight) = self.lock().finish(id) {
            flight.cancel.cancel();
        }
        self.request_drain();
    }

    /// Cancel a queued or running job.
    pub async fn cancel(&self, id: &str) -> RunnerResult<CancelOutcome> {
        let dequeued = {
            let mut state = self.lock();
            if let Some(flight) = state.in_flight.get(id) {
                flight.cancel.cancel();
                info!(job = %id, "cancellation requested");
                return Ok(CancelOutcome::Signalled);
            }
            state.queue.remove(id)
        };

        let written = self
            .inner
            .guard
            .try_set_terminal(
                id,
                JobStatus::Queued,
                Terminal::cancelled("cancelled by operator"),
            )
            .await;
        match written {
            Ok(true) => {
                info!(job = %id, "queued job cancelled");
                Ok(CancelOutcome::Dequeued)
            }
            Ok(false) => {
                let status = self.inner.store.get(id).await?.status;
                Ok(CancelOutcome::NotCancellable(status))
            }
            Err(e) => {
                if let Some(entry) = dequeued {
                    self.lock().queue.insert(entry);
                }
                Err(e)
            }
        }
    }

    /// Fire every running job's cancellation token. Used on shutdown.
    pub fn cancel_running(&self) -> usize {
        let state = self.lock();
        for flight in state.in_flight.values() {
            flight.cancel.cancel();
        }
        state.in_flight.len()
    }

    pub fn running_total(&self) -> usize {
        self.lock().queue.running_total()
    }

    pub fn pause(&self) {
        self.lock().breaker.pause();
        info!("dispatch paused by operator");
    }

    pub fn resume(&self) {
        self.lock().breaker.resume();
        info!("dispatch resumed by operator");
        self.request_drain();
    }

    pub fn health(&self) -> SystemHealth {
        let health = self.lock().breaker.health(self.inner.clock.now());
        self.flush_transitions();
        health
    }

    /// Whether `provider` is currently held back.
    pub fn is_provider_open(&self, provider: &str) -> bool {
        let open = self
            .lock()
            .breaker
            .is_open(provider, self.inner.clock.now());
        self.flush_transitions();
        open
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queued: state
                .queue
                .queued
                .iter()
                .map(|q| QueuedJobView {
                    id: q.job.id.clone(),
                    class: q.job.class,
                    priority: q.job.priority,
                    enqueued_at: q.job.enqueued_at,
                })
                .collect(),
            running: JobClass::ALL
                .into_iter()
                .map(|c| (c, state.queue.running(c)))
                .collect(),
            running_total: state.queue.running_total(),
            total_slots: self.inner.config.total_slots,
        }
    }

    /// Drain on every [`request_drain`](Self::request_drain) and on a fixed
    /// tick until `shutdown` fires.
    pub fn spawn_driver(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.inner.config.drain_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = scheduler.inner.drain_signal.notified() => {}
                }
                scheduler.drain().await;
            }
            debug!("scheduler driver stopped");
        })
    }

    fn flush_transitions(&self) {
        let transitions: Vec<BreakerTransition> = self.lock().breaker.take_transitions();
        for transition in &transitions {
            info!(
                provider = %transition.provider,
                from = %transition.from_state,
                to = %transition.to_state,
                "provider circuit transition"
            );
            for listener in &self.inner.listeners {
                listener.on_transition(transition);
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
