//! TCP port probe collector.
//!
//! Measures TCP connection latency to every configured port of a host.

use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::chart::{Chart, ChartSet, ChartTemplate, Dim};
use crate::collector::registry::DEFAULT_PRIORITY;
use crate::collector::{Collector, CollectorError, Context, Samples, decode_config};
use crate::probe::de_seconds;

/// Default connection timeout (2 seconds).
const DEFAULT_TIMEOUT_SECS: f64 = 2.0;

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

/// Configuration for TCP port probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheckConfig {
    /// Target host (IP address or name).
    #[serde(default)]
    pub host: String,
    /// Target ports.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Connection timeout in seconds.
    #[serde(default = "default_timeout", deserialize_with = "de_seconds")]
    pub timeout: f64,
}

impl Default for PortCheckConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            ports: Vec::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PortCheckConfig {
    /// Create a new TCP probe configuration.
    pub fn new(host: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            host: host.into(),
            ports,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the connection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_secs_f64();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.host.trim().is_empty() {
            return Err(CollectorError::Config("'host' option not set".to_string()));
        }
        if self.ports.is_empty() {
            return Err(CollectorError::Config("'ports' option not set".to_string()));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(CollectorError::Config(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        Ok(())
    }
}

fn status_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "port_{port}_status",
                "TCP Check Status",
                "boolean",
                "status",
                "portcheck.status",
            )
            .with_priority(DEFAULT_PRIORITY)
            .with_label("host", "{host}")
            .with_label("port", "{port}")
            .with_dim(Dim::new("port_{port}_success").with_name("success"))
            .with_dim(Dim::new("port_{port}_failed").with_name("failed"))
            .with_dim(Dim::new("port_{port}_timeout").with_name("timeout")),
        )
    })
}

fn latency_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "port_{port}_connection_latency",
                "TCP Connection Latency",
                "ms",
                "latency",
                "portcheck.latency",
            )
            .with_priority(DEFAULT_PRIORITY + 1)
            .with_label("host", "{host}")
            .with_label("port", "{port}")
            .with_dim(Dim::new("port_{port}_latency").with_name("time").with_div(1000)),
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortStatus {
    Success,
    Failed,
    Timeout,
}

impl PortStatus {
    const ALL: [PortStatus; 3] = [Self::Success, Self::Failed, Self::Timeout];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// TCP port probe collector.
///
/// Reports per-port status and connection latency in microseconds.
#[derive(Debug, Default)]
pub struct PortCheckCollector {
    config: PortCheckConfig,
    charts: ChartSet,
    timeout: Duration,
}

impl PortCheckCollector {
    /// Create a new TCP collector with the given configuration.
    pub fn new(config: PortCheckConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    async fn probe(&self, port: u16, budget: Duration) -> (u16, PortStatus, Duration) {
        let host = self.config.host.trim();
        self.classify(port, budget, TcpStream::connect((host, port))).await
    }

    /// Time `connect` against `budget` and map the outcome to a status.
    async fn classify<F, S>(&self, port: u16, budget: Duration, connect: F) -> (u16, PortStatus, Duration)
    where
        F: Future<Output = std::io::Result<S>>,
    {
        let host = self.config.host.trim();
        let start = Instant::now();
        let result = timeout(budget, connect).await;
        let elapsed = start.elapsed();

        let status = match result {
            Ok(Ok(_stream)) => {
                tracing::debug!(host = %host, port, latency_ms = elapsed.as_secs_f64() * 1000.0, "TCP probe successful");
                PortStatus::Success
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %host, port, error = %e, "TCP probe failed");
                PortStatus::Failed
            }
            Err(_) => {
                tracing::debug!(host = %host, port, timeout_ms = budget.as_millis(), "TCP probe timed out");
                PortStatus::Timeout
            }
        };
        (port, status, elapsed)
    }
}

#[async_trait::async_trait]
impl Collector for PortCheckCollector {
    fn name(&self) -> &str {
        "portcheck"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        self.config = decode_config(config)?;
        Ok(())
    }

    async fn init(&mut self, _ctx: &Context) -> Result<(), CollectorError> {
        self.config.validate()?;

        let mut charts = ChartSet::new();
        for port in &self.config.ports {
            let port = port.to_string();
            let subs = [("host", self.config.host.as_str()), ("port", port.as_str())];
            charts.add(status_template().instantiate(&subs))?;
            charts.add(latency_template().instantiate(&subs))?;
        }

        self.charts = charts;
        self.timeout = Duration::from_secs_f64(self.config.timeout);
        Ok(())
    }

    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError> {
        ctx.check()?;
        let budget = ctx.budget(self.timeout);
        let probes = self.config.ports.iter().map(|port| self.probe(*port, budget));
        let results = ctx.run(futures::future::join_all(probes)).await?;

        let mut mx = Samples::new();
        for (port, status, elapsed) in results {
            for s in PortStatus::ALL {
                mx.insert(format!("port_{port}_{}", s.as_str()), i64::from(status == s));
            }
            if status == PortStatus::Success {
                let micros = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX);
                mx.insert(format!("port_{port}_latency"), micros);
            }
        }
        Ok(mx)
    }

    fn charts(&self) -> &ChartSet {
        &self.charts
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.config.timeout))
    }

    fn cleanup(&mut self) {}
}
