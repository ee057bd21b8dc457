//! Tick scheduler.
//!
//! Owns the tick loop for every job. A coordinator task keeps a due-time
//! queue and hands work items to a fixed pool of worker tasks.
//!
//! # Architecture
//!
//! - **Admission**: a submitted job is initialized and checked on a worker;
//!   only a job that reaches `running` enters the tick loop.
//! - **Ticks**: each due job gets a deadline of
//!   `now + min(update_every, timeout)` and a child cancellation token that
//!   fires on removal or shutdown. The next due time stays aligned to
//!   `update_every`; missed ticks are skipped.
//! - **Serialization**: a work item moves the job itself to the worker,
//!   so one job never has two ticks in flight.
//! - **Retries**: a job in `retrying` is re-admitted once its
//!   `autodetection_retry` has passed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chartd::job::JobSpec;
//! use chartd::scheduler::{Scheduler, SchedulerConfig};
//! use chartd::sink::memory::MemorySink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Scheduler::new(SchedulerConfig::default(), Arc::new(MemorySink::new())).start();
//! let spec = JobSpec::new("portcheck", "local")
//!     .with_config(serde_json::json!({"host": "127.0.0.1", "ports": [22]}));
//! handle.submit(spec).await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod info;
mod queue;
mod worker;

pub use info::{JobInfo, summary_table};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, Registry};
use crate::job::{DEFAULT_MAX_FAILURES, Job, JobSpec, JobState, TickOutcome};
use crate::sink::Sink;

use queue::{DueQueue, next_due};
use worker::{Done, Work};

/// Upper bound of the default worker count.
pub const DEFAULT_MAX_WORKERS: usize = 32;
/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No collector registered under this name.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// A job with the same full name is already scheduled.
    #[error("job '{0}' already exists")]
    Duplicate(String),

    /// No job with this full name.
    #[error("job '{0}' not found")]
    NotFound(String),

    /// The scheduler has shut down.
    #[error("scheduler is not running")]
    Closed,
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Consecutive failed ticks before a job is demoted.
    pub max_failures: u32,
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(DEFAULT_MAX_WORKERS),
            max_failures: DEFAULT_MAX_FAILURES,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Available CPU parallelism, clamped to `1..=max`.
pub fn default_workers(max: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, max.max(1))
}

/// Scheduler builder. [`Scheduler::start`] spawns the tasks.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<Registry>,
    sink: Arc<dyn Sink>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Scheduler over the process-wide registry.
    pub fn new(config: SchedulerConfig, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::global().clone()),
            sink,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Spawn the worker pool and the coordinator.
    pub fn start(self) -> SchedulerHandle {
        let root = CancellationToken::new();
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let work_rx: worker::WorkQueue = Arc::new(Mutex::new(work_rx));

        let workers = self.config.workers.max(1);
        let worker_handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker::run(
                    id,
                    Arc::clone(&work_rx),
                    done_tx.clone(),
                    Arc::clone(&self.sink),
                ))
            })
            .collect();

        let jobs = Arc::new(RwLock::new(BTreeMap::new()));
        let dropped_ticks = Arc::new(AtomicU64::new(0));

        let coordinator = Coordinator {
            root: root.clone(),
            max_failures: self.config.max_failures,
            slots: HashMap::new(),
            queue: DueQueue::new(),
            work_tx,
            done_tx,
            workers: worker_handles,
            jobs: Arc::clone(&jobs),
            dropped_ticks: Arc::clone(&dropped_ticks),
            summary_pending: false,
        };
        let task = tokio::spawn(coordinator.run(ctl_rx, done_rx));

        tracing::info!(workers, "scheduler started");
        SchedulerHandle {
            ctl: ctl_tx,
            registry: self.registry,
            jobs,
            dropped_ticks,
            root,
            task: Arc::new(Mutex::new(Some(task))),
            shutdown_timeout: self.config.shutdown_timeout,
        }
    }
}

enum Control {
    Submit {
        job: Job,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    StartupComplete,
}

/// Cloneable handle to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    ctl: mpsc::UnboundedSender<Control>,
    registry: Arc<Registry>,
    jobs: Arc<RwLock<BTreeMap<String, JobInfo>>>,
    dropped_ticks: Arc<AtomicU64>,
    root: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Create the job's collector from the registry and submit it.
    pub async fn submit(&self, spec: JobSpec) -> Result<(), SchedulerError> {
        let creator = self
            .registry
            .get(&spec.module)
            .ok_or_else(|| SchedulerError::UnknownModule(spec.module.clone()))?;
        let collector = (creator.create)();
        self.submit_collector(spec, collector).await
    }

    /// Submit a job with an explicit collector instance.
    pub async fn submit_collector(
        &self,
        spec: JobSpec,
        collector: Box<dyn Collector>,
    ) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        let job = Job::new(spec, collector);
        self.ctl
            .send(Control::Submit { job, reply })
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Stop a job by full name. Its in-flight tick, if any, is cancelled
    /// first.
    pub async fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.ctl
            .send(Control::Remove {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Log the startup summary once every job submitted so far has been
    /// admitted or has failed.
    pub fn startup_complete(&self) {
        let _ = self.ctl.send(Control::StartupComplete);
    }

    /// Snapshot of every known job, sorted by full name.
    pub async fn jobs(&self) -> Vec<JobInfo> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn job(&self, name: &str) -> Option<JobInfo> {
        self.jobs.read().await.get(name).cloned()
    }

    /// Ticks dropped because the sink was full.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Stop every job and wait for the scheduler, bounded by the shutdown
    /// timeout.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, task).await {
            Ok(Ok(())) => tracing::info!("scheduler shutdown complete"),
            Ok(Err(e)) => tracing::error!(error = %e, "scheduler task failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "scheduler shutdown timed out"
            ),
        }
    }
}

/// Per-job bookkeeping in the coordinator.
struct Slot {
    /// `None` while a worker holds the job.
    job: Option<Job>,
    /// Due time the queue entry for this job was pushed with.
    next_due: Option<Instant>,
    /// Cancels the in-flight work item.
    in_flight: Option<CancellationToken>,
    admitting: bool,
    removing: bool,
}

struct Coordinator {
    root: CancellationToken,
    max_failures: u32,
    slots: HashMap<String, Slot>,
    queue: DueQueue,
    work_tx: mpsc::UnboundedSender<Work>,
    /// Keeps the done channel open while no worker is alive.
    done_tx: mpsc::UnboundedSender<Done>,
    workers: Vec<JoinHandle<()>>,
    jobs: Arc<RwLock<BTreeMap<String, JobInfo>>>,
    dropped_ticks: Arc<AtomicU64>,
    summary_pending: bool,
}

async fn sleep_until_opt(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

impl Coordinator {
    async fn run(
        mut self,
        mut ctl_rx: mpsc::UnboundedReceiver<Control>,
        mut done_rx: mpsc::UnboundedReceiver<Done>,
    ) {
        loop {
            let next = self.queue.peek_due();
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                Some(done) = done_rx.recv() => self.handle_done(done).await,
                Some(ctl) = ctl_rx.recv() => self.handle_control(ctl).await,
                _ = sleep_until_opt(next) => self.dispatch_due(),
            }
        }

        self.stop_all(&mut done_rx).await;
        drop(self.done_tx);
        drop(self.work_tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    fn send(&self, work: Work) {
        if self.work_tx.send(work).is_err() {
            tracing::error!("work queue closed");
        }
    }

    async fn publish(&self, job: &Job) {
        self.jobs
            .write()
            .await
            .insert(job.name().to_string(), JobInfo::from_job(job));
    }

    async fn handle_control(&mut self, ctl: Control) {
        match ctl {
            Control::Submit { job, reply } => {
                let name = job.name().to_string();
                if self.slots.contains_key(&name) {
                    let _ = reply.send(Err(SchedulerError::Duplicate(name)));
                    return;
                }
                let job = job.with_max_failures(self.max_failures);
                self.publish(&job).await;
                tracing::debug!(job = %name, module = %job.spec().module, source = %job.spec().source, "job submitted");

                let token = self.root.child_token();
                self.slots.insert(
                    name,
                    Slot {
                        job: None,
                        next_due: None,
                        in_flight: Some(token.clone()),
                        admitting: true,
                        removing: false,
                    },
                );
                self.send(Work::Admit { job, token });
                let _ = reply.send(Ok(()));
            }
            Control::Remove { name, reply } => {
                let Some(slot) = self.slots.get_mut(&name) else {
                    // dead jobs are already dropped; forget their record
                    let known = self.jobs.write().await.remove(&name).is_some();
                    let _ = reply.send(if known {
                        Ok(())
                    } else {
                        Err(SchedulerError::NotFound(name))
                    });
                    return;
                };
                slot.removing = true;
                slot.next_due = None;
                match slot.job.take() {
                    Some(job) => self.send(Work::Stop { job }),
                    None => {
                        if let Some(token) = &slot.in_flight {
                            token.cancel();
                        }
                    }
                }
                tracing::info!(job = %name, "job removal requested");
                let _ = reply.send(Ok(()));
            }
            Control::StartupComplete => {
                self.summary_pending = true;
                self.maybe_log_summary().await;
            }
        }
    }

    async fn handle_done(&mut self, done: Done) {
        match done {
            Done::Admitted { job, state } => {
                self.publish(&job).await;
                self.after_work(job, state, None);
                self.maybe_log_summary().await;
            }
            Done::Ticked { job, outcome } => {
                if outcome == TickOutcome::Dropped {
                    self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
                }
                self.publish(&job).await;
                let state = job.state();
                self.after_work(job, state, Some(outcome));
            }
            Done::Stopped { job } => {
                let name = job.name().to_string();
                self.slots.remove(&name);
                self.jobs.write().await.remove(&name);
            }
        }
    }

    /// Put a returned job back in its slot and schedule what comes next.
    fn after_work(&mut self, job: Job, state: JobState, outcome: Option<TickOutcome>) {
        let name = job.name().to_string();
        let Some(slot) = self.slots.get_mut(&name) else {
            return;
        };
        slot.in_flight = None;
        slot.admitting = false;

        if slot.removing {
            self.send(Work::Stop { job });
            return;
        }

        let now = Instant::now();
        let due = match state {
            JobState::Running => match (outcome, slot.next_due) {
                (Some(_), Some(prev)) => Some(next_due(prev, job.update_every(), now)),
                _ => Some(now),
            },
            JobState::Retrying => Some(job.retry_at().unwrap_or(now)),
            JobState::Dead => {
                tracing::info!(job = %name, "job is dead, dropping it");
                self.slots.remove(&name);
                return;
            }
            _ => None,
        };

        slot.next_due = due;
        slot.job = Some(job);
        if let Some(due) = due {
            self.queue.push(due, name);
        }
    }

    fn dispatch_due(&mut self) {
        let now = Instant::now();
        while let Some((due, name)) = self.queue.pop_due(now) {
            let Some(slot) = self.slots.get_mut(&name) else {
                continue;
            };
            if slot.next_due != Some(due) {
                continue;
            }
            let Some(mut job) = slot.job.take() else {
                continue;
            };

            let token = self.root.child_token();
            slot.in_flight = Some(token.clone());
            match job.state() {
                JobState::Running => {
                    let deadline = now + job.tick_timeout();
                    self.send(Work::Tick {
                        job,
                        token,
                        deadline,
                    });
                }
                JobState::Retrying => {
                    job.begin_recheck();
                    slot.admitting = true;
                    tracing::debug!(job = %name, "re-checking job");
                    self.send(Work::Admit { job, token });
                }
                _ => {
                    slot.in_flight = None;
                    slot.job = Some(job);
                }
            }
        }
    }

    async fn maybe_log_summary(&mut self) {
        if !self.summary_pending || self.slots.values().any(|s| s.admitting) {
            return;
        }
        self.summary_pending = false;

        let jobs = self.jobs.read().await;
        let count = |state: JobState| jobs.values().filter(|j| j.state == state).count();
        tracing::info!(
            jobs = jobs.len(),
            running = count(JobState::Running),
            retrying = count(JobState::Retrying),
            dead = count(JobState::Dead),
            "startup complete"
        );
        for info in jobs.values().filter(|j| j.state == JobState::Dead) {
            tracing::info!(
                job = %info.full_name,
                error = info.stats.last_error.as_deref().unwrap_or("-"),
                "dead job"
            );
        }
    }

    /// Cancel in-flight work, stop every job and wait for the stops.
    async fn stop_all(&mut self, done_rx: &mut mpsc::UnboundedReceiver<Done>) {
        let mut outstanding = 0usize;
        let names: Vec<String> = self.slots.keys().cloned().collect();
        for name in names {
            let Some(slot) = self.slots.get_mut(&name) else {
                continue;
            };
            slot.removing = true;
            outstanding += 1;
            match slot.job.take() {
                Some(job) => self.send(Work::Stop { job }),
                None => {
                    if let Some(token) = &slot.in_flight {
                        token.cancel();
                    }
                }
            }
        }

        while outstanding > 0 {
            let Some(done) = done_rx.recv().await else {
                break;
            };
            match done {
                Done::Admitted { job, .. } | Done::Ticked { job, .. } => {
                    self.send(Work::Stop { job });
                }
                Done::Stopped { job } => {
                    outstanding -= 1;
                    self.publish(&job).await;
                    self.slots.remove(job.name());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workers_is_clamped() {
        assert_eq!(default_workers(1), 1);
        assert!(default_workers(DEFAULT_MAX_WORKERS) <= DEFAULT_MAX_WORKERS);
        assert!(default_workers(0) >= 1);
    }

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default()
            .with_workers(0)
            .with_max_failures(3)
            .with_shutdown_timeout(Duration::from_secs(1));
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_failures, 3);
    }
}
