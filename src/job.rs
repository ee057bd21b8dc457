//! Jobs: one collector instance bound to one configuration.
//!
//! A [`Job`] owns its collector and mediates between the scheduler and
//! that collector. It runs the lifecycle state machine, counts failures,
//! diffs the collector's charts after every tick and hands the result to
//! the sink.
//!
//! # Lifecycle
//!
//! - [`Job::admit`] runs `configure` + `init`, then one `check`. An init
//!   failure kills the job; a failed check parks it in
//!   [`JobState::Retrying`] until `autodetection_retry` has passed.
//! - [`Job::tick`] collects once. `max_failures` consecutive failures
//!   demote a running job to retrying and obsolete its charts.
//! - [`Job::stop`] obsoletes the job's charts and cleans up.

mod diff;
mod state;

pub use state::{JobState, JobStats};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chart::Chart;
use crate::collector::registry::{DEFAULT_AUTODETECTION_RETRY, DEFAULT_PRIORITY, DEFAULT_UPDATE_EVERY};
use crate::collector::{Collector, CollectorError, Context, Defaults, ErrorKind, MIN_UPDATE_EVERY, Samples};
use crate::sink::{Sink, SinkError};

use diff::Snapshot;

/// Default number of consecutive failed ticks before demotion.
pub const DEFAULT_MAX_FAILURES: u32 = 10;

/// Framework-level settings of one job plus its collector config bag.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Registered collector name.
    pub module: String,
    /// Job name, unique within its module.
    pub name: String,
    pub update_every: Duration,
    /// Wait before re-checking a failed job. Zero disables retries.
    pub autodetection_retry: Duration,
    pub priority: u32,
    /// Collector config bag, decoded by the collector.
    pub config: serde_json::Value,
    /// Where the spec came from (file path or `default`).
    pub source: String,
}

impl JobSpec {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            update_every: DEFAULT_UPDATE_EVERY,
            autodetection_retry: DEFAULT_AUTODETECTION_RETRY,
            priority: DEFAULT_PRIORITY,
            config: serde_json::Value::Object(serde_json::Map::new()),
            source: String::new(),
        }
    }

    /// Spec carrying a module's registry defaults.
    pub fn from_defaults(module: impl Into<String>, name: impl Into<String>, defaults: &Defaults) -> Self {
        Self {
            update_every: defaults.update_every,
            autodetection_retry: defaults.autodetection_retry,
            priority: defaults.priority,
            ..Self::new(module, name)
        }
    }

    pub fn with_update_every(mut self, update_every: Duration) -> Self {
        self.update_every = update_every;
        self
    }

    pub fn with_autodetection_retry(mut self, retry: Duration) -> Self {
        self.autodetection_retry = retry;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Identity used towards the sink: `<module>_<name>`, or just the
    /// module when the job is named after it.
    pub fn full_name(&self) -> String {
        if self.name == self.module {
            self.module.clone()
        } else {
            format!("{}_{}", self.module, self.name)
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.name.trim().is_empty() {
            return Err(CollectorError::Config("job name is empty".to_string()));
        }
        if self.update_every < MIN_UPDATE_EVERY {
            return Err(CollectorError::Config(format!(
                "update_every must be at least {}s, got {:?}",
                MIN_UPDATE_EVERY.as_secs(),
                self.update_every
            )));
        }
        Ok(())
    }
}

/// Result of one [`Job::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Samples were handed to the sink.
    Collected { samples: usize },
    /// The tick failed; `None` means the collector returned no samples.
    Failed(Option<ErrorKind>),
    /// The sink did not accept the tick in time.
    Dropped,
    /// The tick failed and the job was demoted to retrying.
    Demoted,
    /// The job was not running.
    Skipped,
}

/// One configured collector instance.
pub struct Job {
    spec: JobSpec,
    full_name: Arc<str>,
    collector: Box<dyn Collector>,
    state: JobState,
    stats: JobStats,
    announced: Snapshot,
    max_failures: u32,
    retry_at: Option<Instant>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.full_name)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(spec: JobSpec, collector: Box<dyn Collector>) -> Self {
        Self {
            full_name: spec.full_name().into(),
            spec,
            collector,
            state: JobState::Created,
            stats: JobStats::default(),
            announced: Snapshot::new(),
            max_failures: DEFAULT_MAX_FAILURES,
            retry_at: None,
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Sink identity, see [`JobSpec::full_name`].
    pub fn name(&self) -> &str {
        &self.full_name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// When a retrying job may be checked again.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn update_every(&self) -> Duration {
        self.spec.update_every
    }

    /// Tick budget: the shorter of `update_every` and the collector timeout.
    pub fn tick_timeout(&self) -> Duration {
        match self.collector.timeout() {
            Some(t) if !t.is_zero() => t.min(self.spec.update_every),
            _ => self.spec.update_every,
        }
    }

    /// Context for one call, cancelled by `token` or at `deadline`.
    pub fn context(&self, token: CancellationToken, deadline: Instant) -> Context {
        Context::new(Arc::clone(&self.full_name))
            .with_token(token)
            .with_deadline(deadline)
    }

    /// Init followed by one check. Returns the resulting state.
    pub async fn admit(&mut self, ctx: &Context) -> JobState {
        if self.init(ctx).await.is_ok() {
            // failures already moved the job to Retrying or Dead
            if let Err(e) = self.check(ctx).await {
                tracing::trace!(job = %self.full_name, error = %e, "admission check failed");
            }
        }
        self.state
    }

    /// Decode the config and initialize the collector.
    ///
    /// Failure is fatal: the job becomes [`JobState::Dead`].
    pub async fn init(&mut self, ctx: &Context) -> Result<(), CollectorError> {
        let result = self.try_init(ctx).await;
        match &result {
            Ok(()) => {
                self.state = JobState::Checking;
                tracing::debug!(job = %self.full_name, module = %self.spec.module, "job initialized");
            }
            Err(e) => {
                tracing::error!(job = %self.full_name, module = %self.spec.module, error = %e, "job init failed");
                self.stats.record_failure(Some(e.kind()), e.to_string());
                self.state = JobState::Dead;
                self.collector.cleanup();
            }
        }
        result
    }

    async fn try_init(&mut self, ctx: &Context) -> Result<(), CollectorError> {
        self.spec.validate()?;
        self.collector.configure(&self.spec.config)?;
        self.collector.init(ctx).await?;
        self.collector.charts().validate()?;
        Ok(())
    }

    /// Probe once. Success admits the job to the tick loop.
    pub async fn check(&mut self, ctx: &Context) -> Result<bool, CollectorError> {
        let result = self.collector.check(ctx).await;
        match &result {
            Ok(true) => {
                self.state = JobState::Running;
                self.retry_at = None;
                self.stats.consecutive_failures = 0;
                tracing::info!(job = %self.full_name, module = %self.spec.module, "job admitted");
            }
            Ok(false) => {
                tracing::warn!(job = %self.full_name, "check collected no metrics");
                self.stats.record_failure(None, "check collected no metrics".to_string());
                self.schedule_retry();
            }
            Err(e) => {
                tracing::warn!(job = %self.full_name, error = %e, "check failed");
                self.stats.record_failure(Some(e.kind()), e.to_string());
                self.schedule_retry();
            }
        }
        result
    }

    fn schedule_retry(&mut self) {
        self.collector.cleanup();
        if self.spec.autodetection_retry.is_zero() {
            tracing::info!(job = %self.full_name, "autodetection retry disabled, giving up");
            self.state = JobState::Dead;
            self.retry_at = None;
        } else {
            self.state = JobState::Retrying;
            self.retry_at = Some(Instant::now() + self.spec.autodetection_retry);
            tracing::info!(
                job = %self.full_name,
                retry_secs = self.spec.autodetection_retry.as_secs(),
                "job will be checked again"
            );
        }
    }

    /// Collect once and hand the result to the sink.
    pub async fn tick(&mut self, ctx: &Context, sink: &dyn Sink) -> TickOutcome {
        if self.state != JobState::Running {
            return TickOutcome::Skipped;
        }
        let at = Utc::now();
        let start = Instant::now();

        let samples = match self.collector.collect(ctx).await {
            Ok(samples) if samples.is_empty() => {
                return self.fail(sink, None, "no metrics collected".to_string()).await;
            }
            Ok(samples) => samples,
            Err(e) => return self.fail(sink, Some(e.kind()), e.to_string()).await,
        };

        match self.emit(&samples, at, ctx.deadline(), sink).await {
            Ok(()) => {
                self.stats.record_success(at, ctx.partial_failures());
                tracing::debug!(
                    job = %self.full_name,
                    samples = samples.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "tick collected"
                );
                TickOutcome::Collected {
                    samples: samples.len(),
                }
            }
            Err(e) => {
                sink.discard(&self.full_name).await;
                self.stats.dropped_ticks += 1;
                tracing::warn!(job = %self.full_name, error = %e, "tick dropped");
                TickOutcome::Dropped
            }
        }
    }

    /// Count a tick that ran past its deadline.
    pub async fn record_timeout(&mut self, sink: &dyn Sink) -> TickOutcome {
        sink.discard(&self.full_name).await;
        self.fail(sink, Some(ErrorKind::Timeout), CollectorError::Timeout.to_string())
            .await
    }

    async fn fail(&mut self, sink: &dyn Sink, kind: Option<ErrorKind>, error: String) -> TickOutcome {
        if kind == Some(ErrorKind::Internal) {
            tracing::error!(job = %self.full_name, error = %error, "tick failed");
        } else {
            tracing::warn!(job = %self.full_name, error = %error, "tick failed");
        }
        self.stats.record_failure(kind, error);

        if self.stats.consecutive_failures < self.max_failures {
            return TickOutcome::Failed(kind);
        }

        tracing::info!(
            job = %self.full_name,
            failures = self.stats.consecutive_failures,
            "too many consecutive failures, demoting job"
        );
        self.obsolete_all(sink).await;
        self.schedule_retry();
        if self.state == JobState::Retrying {
            TickOutcome::Demoted
        } else {
            TickOutcome::Failed(kind)
        }
    }

    /// Stage the chart diff and the samples, then flush them as one tick.
    async fn emit(
        &mut self,
        samples: &Samples,
        at: DateTime<Utc>,
        deadline: Option<Instant>,
        sink: &dyn Sink,
    ) -> Result<(), SinkError> {
        let charts = self.collector.charts();
        let changes = diff::diff(&self.announced, charts);
        let name = &*self.full_name;

        for chart in changes.created.iter().chain(&changes.updated) {
            sink.announce(name, &with_default_priority(chart, self.spec.priority), self.spec.update_every)
                .await?;
        }
        for id in &changes.removed {
            sink.obsolete(name, id).await?;
        }

        for chart in charts.iter().filter(|c| !c.opts.obsolete) {
            let values: Vec<(String, i64)> = chart
                .dims
                .iter()
                .filter(|d| !d.opts.obsolete)
                .filter_map(|d| samples.get(&d.id).map(|v| (d.id.clone(), *v)))
                .collect();
            if values.is_empty() {
                continue;
            }
            sink.sample(name, &chart.id, at, values).await?;
        }

        sink.flush(name, deadline).await?;
        self.announced = diff::snapshot(charts);
        Ok(())
    }

    async fn obsolete_all(&mut self, sink: &dyn Sink) {
        if self.announced.is_empty() {
            return;
        }
        for id in self.announced.keys() {
            if let Err(e) = sink.obsolete(&self.full_name, id).await {
                tracing::warn!(job = %self.full_name, chart = %id, error = %e, "failed to obsolete chart");
            }
        }
        if let Err(e) = sink.flush(&self.full_name, None).await {
            tracing::warn!(job = %self.full_name, error = %e, "failed to flush obsolete charts");
            sink.discard(&self.full_name).await;
        }
        self.announced.clear();
    }

    /// Move a retrying job back to checking once its retry time has come.
    pub fn begin_recheck(&mut self) -> bool {
        if self.state != JobState::Retrying {
            return false;
        }
        self.state = JobState::Created;
        self.retry_at = None;
        true
    }

    /// Obsolete the job's charts and release the collector.
    pub async fn stop(&mut self, sink: &dyn Sink) {
        if matches!(self.state, JobState::Stopped | JobState::Terminal) {
            return;
        }
        self.state = JobState::Stopped;
        self.obsolete_all(sink).await;
        self.collector.cleanup();
        self.state = JobState::Terminal;
        tracing::info!(job = %self.full_name, "job stopped");
    }
}

fn with_default_priority(chart: &Chart, priority: u32) -> Chart {
    let mut chart = chart.clone();
    if chart.priority == 0 {
        chart.priority = priority;
    }
    chart
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartSet, Dim};
    use crate::sink::memory::MemorySink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Step = Result<Samples, CollectorError>;

    /// Collector that replays scripted results.
    #[derive(Default)]
    struct Scripted {
        steps: VecDeque<Step>,
        fail_init: bool,
        charts: ChartSet,
        cleanups: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Collector for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn configure(&mut self, _config: &serde_json::Value) -> Result<(), CollectorError> {
            Ok(())
        }

        async fn init(&mut self, _ctx: &Context) -> Result<(), CollectorError> {
            if self.fail_init {
                return Err(CollectorError::Config("bad config".into()));
            }
            let mut charts = ChartSet::new();
            charts.add_all([
                Chart::new("a", "A", "units", "fam", "test.a")
                    .with_dim(Dim::new("x"))
                    .with_dim(Dim::new("y")),
                Chart::new("b", "B", "units", "fam", "test.b")
                    .with_priority(5)
                    .with_dim(Dim::new("z")),
            ])?;
            self.charts = charts;
            Ok(())
        }

        async fn check(&mut self, _ctx: &Context) -> Result<bool, CollectorError> {
            Ok(true)
        }

        async fn collect(&mut self, _ctx: &Context) -> Result<Samples, CollectorError> {
            let step = self.steps.pop_front().unwrap_or_else(|| Ok(Samples::new()));
            if let Ok(samples) = &step {
                if samples.contains_key("drop_y") {
                    if let Some(chart) = self.charts.get_mut("a") {
                        let _ = chart.remove_dim("y");
                    }
                }
            }
            step
        }

        fn charts(&self) -> &ChartSet {
            &self.charts
        }

        fn cleanup(&mut self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn samples(pairs: &[(&str, i64)]) -> Samples {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn ctx() -> Context {
        Context::new("test")
    }

    async fn running(collector: Scripted) -> Job {
        let mut job = Job::new(JobSpec::new("scripted", "local"), Box::new(collector));
        assert_eq!(job.admit(&ctx()).await, JobState::Running);
        job
    }

    #[test]
    fn test_full_name() {
        assert_eq!(JobSpec::new("bind", "local").full_name(), "bind_local");
        assert_eq!(JobSpec::new("bind", "bind").full_name(), "bind");
    }

    #[test]
    fn test_spec_validation() {
        assert!(JobSpec::new("m", "").validate().is_err());
        assert!(
            JobSpec::new("m", "j")
                .with_update_every(Duration::from_millis(500))
                .validate()
                .is_err()
        );
        assert!(JobSpec::new("m", "j").validate().is_ok());
    }

    #[tokio::test]
    async fn test_init_failure_kills_job() {
        let collector = Scripted {
            fail_init: true,
            ..Default::default()
        };
        let cleanups = Arc::clone(&collector.cleanups);
        let mut job = Job::new(JobSpec::new("scripted", "local"), Box::new(collector));

        assert_eq!(job.admit(&ctx()).await, JobState::Dead);
        assert_eq!(job.stats().last_error.as_deref(), Some("bad config"));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_tick_announces_and_samples() {
        let sink = MemorySink::new();
        let mut job = running(Scripted::new(vec![Ok(samples(&[("x", 1), ("y", 2)]))])).await;

        let outcome = job.tick(&ctx(), &sink).await;
        assert_eq!(outcome, TickOutcome::Collected { samples: 2 });

        let announced = sink.announced("scripted_local");
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[0].id, "a");
        assert_eq!(announced[0].priority, DEFAULT_PRIORITY);
        assert_eq!(announced[1].id, "b");
        assert_eq!(announced[1].priority, 5);
        assert_eq!(
            sink.samples("scripted_local", "a"),
            vec![vec![("x".to_string(), 1), ("y".to_string(), 2)]]
        );
        // no sample for chart b this tick
        assert!(sink.samples("scripted_local", "b").is_empty());
        assert_eq!(job.stats().ticks, 1);
    }

    #[tokio::test]
    async fn test_charts_announced_once() {
        let sink = MemorySink::new();
        let mut job = running(Scripted::new(vec![
            Ok(samples(&[("x", 1)])),
            Ok(samples(&[("x", 2)])),
        ]))
        .await;
        job.tick(&ctx(), &sink).await;
        job.tick(&ctx(), &sink).await;
        assert_eq!(sink.announced("scripted_local").len(), 2);
        assert_eq!(sink.samples("scripted_local", "a").len(), 2);
    }

    #[tokio::test]
    async fn test_removed_dimension_is_reannounced_obsolete() {
        let sink = MemorySink::new();
        let mut job = running(Scripted::new(vec![
            Ok(samples(&[("x", 1), ("y", 1)])),
            Ok(samples(&[("x", 2), ("drop_y", 0)])),
        ]))
        .await;
        job.tick(&ctx(), &sink).await;
        job.tick(&ctx(), &sink).await;

        let announced = sink.announced("scripted_local");
        assert_eq!(announced.len(), 3);
        let chart = &announced[2];
        assert_eq!(chart.id, "a");
        assert!(chart.get_dim("y").unwrap().opts.obsolete);
        assert!(sink.obsoleted("scripted_local").is_empty());
    }

    #[tokio::test]
    async fn test_empty_collects_demote_job() {
        let sink = MemorySink::new();
        let mut steps = vec![Ok(samples(&[("x", 1)]))];
        steps.extend((0..DEFAULT_MAX_FAILURES).map(|_| Ok(Samples::new())));
        let mut job = running(Scripted::new(steps)).await;

        job.tick(&ctx(), &sink).await;
        for i in 1..DEFAULT_MAX_FAILURES {
            assert_eq!(job.tick(&ctx(), &sink).await, TickOutcome::Failed(None), "tick {i}");
        }
        assert_eq!(job.tick(&ctx(), &sink).await, TickOutcome::Demoted);
        assert_eq!(job.state(), JobState::Retrying);
        assert!(job.retry_at().is_some());

        let mut obsoleted = sink.obsoleted("scripted_local");
        obsoleted.sort();
        assert_eq!(obsoleted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(job.tick(&ctx(), &sink).await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_full_sink_drops_tick_and_reannounces() {
        let sink = MemorySink::new();
        let mut job = running(Scripted::new(vec![
            Ok(samples(&[("x", 1)])),
            Ok(samples(&[("x", 2)])),
        ]))
        .await;

        sink.set_full(true);
        assert_eq!(job.tick(&ctx(), &sink).await, TickOutcome::Dropped);
        assert_eq!(job.stats().dropped_ticks, 1);
        assert_eq!(job.stats().failures, 0);

        sink.set_full(false);
        job.tick(&ctx(), &sink).await;
        assert_eq!(sink.announced("scripted_local").len(), 2);
        assert_eq!(
            sink.samples("scripted_local", "a"),
            vec![vec![("x".to_string(), 2)]]
        );
    }

    #[tokio::test]
    async fn test_failed_check_without_retry_is_dead() {
        struct NeverReady(ChartSet);

        #[async_trait::async_trait]
        impl Collector for NeverReady {
            fn name(&self) -> &str {
                "never"
            }
            fn configure(&mut self, _: &serde_json::Value) -> Result<(), CollectorError> {
                Ok(())
            }
            async fn init(&mut self, _: &Context) -> Result<(), CollectorError> {
                Ok(())
            }
            async fn collect(&mut self, _: &Context) -> Result<Samples, CollectorError> {
                Err(CollectorError::Network("refused".into()))
            }
            fn charts(&self) -> &ChartSet {
                &self.0
            }
            fn cleanup(&mut self) {}
        }

        let spec = JobSpec::new("never", "never").with_autodetection_retry(Duration::ZERO);
        let mut job = Job::new(spec, Box::new(NeverReady(ChartSet::new())));
        assert_eq!(job.admit(&ctx()).await, JobState::Dead);

        let spec = JobSpec::new("never", "never");
        let mut job = Job::new(spec, Box::new(NeverReady(ChartSet::new())));
        assert_eq!(job.admit(&ctx()).await, JobState::Retrying);
        assert!(job.begin_recheck());
        assert_eq!(job.state(), JobState::Created);
    }

    #[tokio::test]
    async fn test_stop_obsoletes_charts() {
        let sink = MemorySink::new();
        let collector = Scripted::new(vec![Ok(samples(&[("x", 1), ("z", 3)]))]);
        let cleanups = Arc::clone(&collector.cleanups);
        let mut job = running(collector).await;
        job.tick(&ctx(), &sink).await;

        job.stop(&sink).await;
        job.stop(&sink).await;
        assert_eq!(job.state(), JobState::Terminal);
        assert_eq!(sink.obsoleted("scripted_local").len(), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let sink = MemorySink::new();
        let mut job = running(Scripted::new(vec![])).await;
        assert_eq!(
            job.record_timeout(&sink).await,
            TickOutcome::Failed(Some(ErrorKind::Timeout))
        );
        assert_eq!(job.stats().last_error.as_deref(), Some("timeout elapsed"));
    }
}
