use std::net::IpAddr;
use std::time::Duration;

use hickory_proto::rr::{Name, RecordType};
use serde::{Deserialize, Serialize};

use super::charts::{server_charts, status_dim_id, time_dim_id};
use crate::chart::ChartSet;
use crate::collector::{Collector, CollectorError, Context, Samples, decode_config};
use crate::probe::de_seconds;
use crate::probe::dns::{DnsClient, DnsNetwork, DnsOutcome, parse_domain, parse_record_type};

/// Default per-query timeout (2 seconds).
const DEFAULT_TIMEOUT_SECS: f64 = 2.0;

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_record_types() -> Vec<String> {
    vec!["A".to_string()]
}

/// Configuration for the DNS query collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsQueryConfig {
    /// Domains to resolve, one per tick in rotation.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Servers to query.
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub network: DnsNetwork,
    #[serde(default = "default_record_types")]
    pub record_types: Vec<String>,
    /// Port used for servers given without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Per-query timeout in seconds.
    #[serde(default = "default_timeout", deserialize_with = "de_seconds")]
    pub timeout: f64,
}

impl Default for DnsQueryConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            servers: Vec::new(),
            network: DnsNetwork::Udp,
            record_types: default_record_types(),
            port: None,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DnsQueryConfig {
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.domains.iter().all(|d| d.trim().is_empty()) {
            return Err(CollectorError::Config("no domains specified".to_string()));
        }
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(CollectorError::Config("no servers specified".to_string()));
        }
        if self.record_types.is_empty() {
            return Err(CollectorError::Config("no record types specified".to_string()));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(CollectorError::Config(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        Ok(())
    }

    fn address(&self, server: &str) -> String {
        let Some(port) = self.port else {
            return server.to_string();
        };
        match server.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
            Ok(IpAddr::V4(ip)) => format!("{ip}:{port}"),
            Err(_) if !server.contains(':') => format!("{server}:{port}"),
            Err(_) => server.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    server: String,
    address: String,
    rtype_name: String,
    rtype: RecordType,
}

/// DNS query collector.
#[derive(Debug, Default)]
pub struct DnsQueryCollector {
    config: DnsQueryConfig,
    charts: ChartSet,
    client: Option<DnsClient>,
    targets: Vec<Target>,
    domains: Vec<Name>,
    next_domain: usize,
}

impl DnsQueryCollector {
    pub fn new(config: DnsQueryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Collector for DnsQueryCollector {
    fn name(&self) -> &str {
        "dns_query"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        self.config = decode_config(config)?;
        Ok(())
    }

    async fn init(&mut self, _ctx: &Context) -> Result<(), CollectorError> {
        self.config.validate()?;

        let domains = self
            .config
            .domains
            .iter()
            .filter(|d| !d.trim().is_empty())
            .map(|d| parse_domain(d))
            .collect::<Result<Vec<_>, _>>()?;

        let mut targets = Vec::new();
        let mut charts = ChartSet::new();
        for server in self.config.servers.iter().filter(|s| !s.trim().is_empty()) {
            for name in &self.config.record_types {
                let rtype = parse_record_type(name)?;
                let rtype_name = rtype.to_string();
                charts.add_all(server_charts(server, self.config.network.as_str(), &rtype_name))?;
                targets.push(Target {
                    server: server.clone(),
                    address: self.config.address(server),
                    rtype_name,
                    rtype,
                });
            }
        }

        self.client = Some(DnsClient::new(
            self.config.network,
            Duration::from_secs_f64(self.config.timeout),
        ));
        self.domains = domains;
        self.targets = targets;
        self.charts = charts;
        Ok(())
    }

    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError> {
        ctx.check()?;
        if self.domains.is_empty() {
            return Err(CollectorError::Internal("collect called before init".to_string()));
        }
        let idx = self.next_domain % self.domains.len();
        self.next_domain = self.next_domain.wrapping_add(1);

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CollectorError::Internal("collect called before init".to_string()))?;
        let domain = &self.domains[idx];

        let budget = ctx.budget(client.timeout());
        let queries = self.targets.iter().map(|target| async move {
            let result = client
                .query_within(&target.address, domain, target.rtype, budget)
                .await;
            (target, result)
        });
        let results = ctx.run(futures::future::join_all(queries)).await?;

        let mut mx = Samples::new();
        for (target, result) in results {
            for outcome in DnsOutcome::ALL {
                mx.insert(
                    status_dim_id(&target.server, &target.rtype_name, outcome.as_str()),
                    i64::from(result.outcome == outcome),
                );
            }
            match result.outcome {
                DnsOutcome::Success => {
                    mx.insert(
                        time_dim_id(&target.server, &target.rtype_name),
                        result.rtt_nanos(),
                    );
                }
                _ => {
                    tracing::debug!(
                        job = %ctx.job(),
                        server = %target.server,
                        domain = %domain,
                        record_type = %target.rtype_name,
                        error = result.error.as_deref().unwrap_or(""),
                        "DNS query failed"
                    );
                }
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

    fn cleanup(&mut self) {
        self.client = None;
    }
}
