//! Core collector traits and types.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chart::{ChartError, ChartSet};
use crate::probe::{ProbeError, ProbeErrorKind};

/// Minimum allowed update interval (1 second).
pub const MIN_UPDATE_EVERY: Duration = Duration::from_secs(1);

/// One tick's samples, keyed by dimension ID.
pub type Samples = HashMap<String, i64>;

/// Error class, shared by the job's counters and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or impossible configuration.
    Config,
    /// Transport failure reaching the target.
    Network,
    /// Target reachable but the response is malformed.
    Protocol,
    /// Deadline exceeded.
    Timeout,
    /// Some sub-entities failed while others succeeded.
    Partial,
    /// Bug in a collector or the framework.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Timeout => "timeout",
            Self::Partial => "partial",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl From<ProbeErrorKind> for ErrorKind {
    fn from(kind: ProbeErrorKind) -> Self {
        match kind {
            ProbeErrorKind::Network => Self::Network,
            ProbeErrorKind::Protocol => Self::Protocol,
            ProbeErrorKind::Config => Self::Config,
            ProbeErrorKind::Timeout => Self::Timeout,
        }
    }
}

/// Errors returned by collectors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Configuration error. Displays the bare message.
    #[error("{0}")]
    Config(String),

    /// Network I/O error.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timeout elapsed or the tick was cancelled.
    #[error("timeout elapsed")]
    Timeout,

    /// Invariant broken inside the collector.
    #[error("internal error: {0}")]
    Internal(String),

    /// Probe client failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Chart construction failure.
    #[error("chart error: {0}")]
    Chart(#[from] ChartError),
}

impl CollectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Network(_) => ErrorKind::Network,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout => ErrorKind::Timeout,
            Self::Internal(_) | Self::Chart(_) => ErrorKind::Internal,
            Self::Probe(e) => e.kind().into(),
        }
    }
}

/// Decode a job's config bag into the collector's typed config.
///
/// Unknown keys are ignored.
pub fn decode_config<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, CollectorError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CollectorError::Config(format!("invalid config: {e}")))
}

/// Per-call context handed to collectors.
///
/// Carries the job name, the cancellation token that fires at the tick
/// deadline, and a counter for partial failures.
#[derive(Debug, Clone)]
pub struct Context {
    job: Arc<str>,
    token: CancellationToken,
    deadline: Option<Instant>,
    partial: Arc<AtomicU64>,
}

impl Context {
    pub fn new(job: impl Into<Arc<str>>) -> Self {
        Self {
            job: job.into(),
            token: CancellationToken::new(),
            deadline: None,
            partial: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Time one I/O call may take: `limit`, cut short so that it expires
    /// a tenth of the remaining time ahead of the deadline.
    ///
    /// A collector that reports its own timeouts as samples bounds each
    /// call with this, so the outcome is classified before the tick is
    /// cancelled.
    pub fn budget(&self, limit: Duration) -> Duration {
        match self.remaining() {
            Some(left) => limit.min(left - left / 10),
            None => limit,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancelled explicitly or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`CollectorError::Timeout`] if cancelled.
    pub fn check(&self) -> Result<(), CollectorError> {
        if self.is_cancelled() {
            Err(CollectorError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Completes once cancelled or past the deadline.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run `fut` unless cancellation wins first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CollectorError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CollectorError::Timeout),
            value = fut => Ok(value),
        }
    }

    /// Count sub-entities that failed while the tick still succeeded.
    pub fn record_partial(&self, failed: u64) {
        self.partial.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn partial_failures(&self) -> u64 {
        self.partial.load(Ordering::Relaxed)
    }
}

/// Core collector trait for implementing data sources.
///
/// A job drives an instance through `configure`, `init`, `check`, then
/// `collect` once per tick, and finally `cleanup`.
///
/// # Error Handling Philosophy
///
/// Return `Ok` with whatever samples could be gathered. A failure that
/// prevents every sample is an `Err`. A failure of some sub-entities while
/// others succeeded is reported through [`Context::record_partial`] and the
/// tick stays successful. An empty map counts as a failed tick.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Registered module name. Never changes.
    fn name(&self) -> &str;

    /// Decode and validate the job's config bag.
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError>;

    /// Build probe clients and the initial chart set.
    ///
    /// Must be idempotent: a second call replaces, never leaks, clients.
    async fn init(&mut self, ctx: &Context) -> Result<(), CollectorError>;

    /// One real probe. `Ok(true)` iff at least one metric could be sampled.
    async fn check(&mut self, ctx: &Context) -> Result<bool, CollectorError> {
        let samples = self.collect(ctx).await?;
        Ok(!samples.is_empty())
    }

    /// One tick's worth of samples.
    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError>;

    /// The current chart set.
    fn charts(&self) -> &ChartSet;

    /// Per-probe timeout, if the collector has one.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Release probe clients. Safe to call repeatedly and before `init`.
    fn cleanup(&mut self);
}
